//! Macros for reducing event boilerplate.

/// Implements [`Event`](crate::Event) for one or more types, optionally
/// declaring the direct supertypes of a single type.
///
/// # Example
///
/// ```
/// use eventflow_core::{impl_event, EventType};
///
/// #[derive(Debug)]
/// struct Auditable;
/// #[derive(Debug)]
/// struct UserCreated { id: u64 }
/// #[derive(Debug)]
/// struct UserDeleted { id: u64 }
///
/// impl_event!(Auditable);
/// impl_event!(UserCreated: Auditable);
/// impl_event!(UserDeleted: Auditable);
///
/// assert_eq!(
///     EventType::of::<UserCreated>().supertypes(),
///     vec![EventType::of::<Auditable>()],
/// );
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty : $($sup:ty),+ $(,)?) => {
        impl $crate::Event for $ty {
            fn supertypes() -> ::std::vec::Vec<$crate::EventType> {
                ::std::vec![$($crate::EventType::of::<$sup>()),+]
            }
        }
    };
    ($($ty:ty),+ $(,)?) => {
        $(impl $crate::Event for $ty {})+
    };
}
