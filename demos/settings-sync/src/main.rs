//! # Settings Sync Demo
//!
//! A settings screen publishes changes; panels that open later pick up the
//! current values through sticky replay, a persister writes changes in the
//! background, and analytics runs on the pool.
//!
//! Run with `RUST_LOG=eventflow_core=debug` to see the bus's own logs.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use eventflow_core::{
    impl_event, DeadEvent, DeliveryMode, ErrorContext, EventBus, InvocationError, MethodTable,
    Subscriber,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Events
// ============================================================================

/// Marker for every settings change.
#[derive(Debug)]
struct SettingChanged;

#[derive(Debug, Clone)]
struct ThemeChanged {
    mode: &'static str,
}

#[derive(Debug, Clone)]
struct LocaleChanged {
    locale: &'static str,
}

/// Nobody listens for this one.
#[derive(Debug)]
struct CacheCleared;

impl_event!(SettingChanged, CacheCleared);
impl_event!(ThemeChanged: SettingChanged);
impl_event!(LocaleChanged: SettingChanged);

// ============================================================================
// Subscribers
// ============================================================================

/// Opened after startup; needs the current theme immediately.
#[derive(Default)]
struct PreviewPanel {
    mode: Mutex<Option<&'static str>>,
}

impl Subscriber for PreviewPanel {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("apply_theme", |panel: &PreviewPanel, theme: &ThemeChanged| {
                *panel.mode.lock().unwrap_or_else(|e| e.into_inner()) = Some(theme.mode);
                info!(mode = theme.mode, "preview panel repainted");
                Ok(())
            })
            .sticky(true);
    }
}

/// Writes every change to storage, one at a time, in order.
struct Persister {
    saved: mpsc::Sender<String>,
}

impl Subscriber for Persister {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on_any::<SettingChanged, _>("persist", |p: &Persister, change| {
                let line = format!("{change:?}");
                std::thread::sleep(Duration::from_millis(20));
                info!(%line, "persisted");
                p.saved.send(line)?;
                Ok(())
            })
            .mode(DeliveryMode::Background);
    }
}

/// Reports locale changes; the endpoint refuses Klingon.
struct Analytics;

impl Subscriber for Analytics {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("track_locale", |_: &Analytics, change: &LocaleChanged| {
                if change.locale == "tlh" {
                    bail!("analytics endpoint rejected locale {}", change.locale);
                }
                info!(locale = change.locale, "locale tracked");
                Ok(())
            })
            .mode(DeliveryMode::Async);
    }
}

struct DeadLetters;

impl Subscriber for DeadLetters {
    fn declare(methods: &mut MethodTable<Self>) {
        methods.on("unhandled", |_: &DeadLetters, dead: &DeadEvent| {
            info!(event = dead.event().type_name(), "event had no subscribers");
            Ok(())
        });
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("settings_sync_demo=info".parse()?),
        )
        .init();

    let bus = EventBus::builder()
        .error_handler(|err: &InvocationError, ctx: &ErrorContext| -> Result<()> {
            error!(
                subscriber = ctx.subscriber().type_name(),
                method = ctx.method_name(),
                label = err.as_label(),
                "{err}"
            );
            Ok(())
        })
        .build()?;

    let (saved_tx, saved_rx) = mpsc::channel();
    bus.register(&Arc::new(Persister { saved: saved_tx }))?;
    bus.register(&Arc::new(Analytics))?;
    bus.register(&Arc::new(DeadLetters))?;

    bus.post_sticky(ThemeChanged { mode: "light" })?;
    bus.post_sticky(ThemeChanged { mode: "dark" })?;
    bus.post_sticky(LocaleChanged { locale: "fr" })?;
    bus.post(LocaleChanged { locale: "tlh" })?;
    bus.post(CacheCleared)?;

    // Opened late: receives the latest theme during registration.
    let preview = Arc::new(PreviewPanel::default());
    bus.register(&preview)?;
    let mode = *preview.mode.lock().unwrap_or_else(|e| e.into_inner());
    info!(?mode, "preview panel opened");

    let mut persisted = Vec::new();
    while persisted.len() < 4 {
        persisted.push(saved_rx.recv_timeout(Duration::from_secs(5))?);
    }
    info!(count = persisted.len(), "all changes persisted");

    bus.shutdown();
    Ok(())
}
