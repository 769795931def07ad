use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser as _;
use tray_engine::{TrayBus, TrayConfig, TrayEngine};

mod opts;

/// How often pending X events are collected.
#[cfg(feature = "x11")]
const X_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

fn main() -> Result<()> {
    let opts = opts::Opt::parse();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("dock_tray"), log_level_filter)
            .filter(Some("tray_engine"), log_level_filter)
            .init();
    }

    let config = load_config(opts.config.as_deref())?;
    log::debug!("using {:?}", config);

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().context("Failed to start the runtime")?;
    rt.block_on(run(opts, config))
}

fn load_config(path: Option<&Path>) -> Result<TrayConfig> {
    let Some(path) = path else {
        return Ok(TrayConfig::default());
    };
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid tray configuration in {}", path.display()))
}

async fn run(opts: opts::Opt, config: TrayConfig) -> Result<()> {
    let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;
    let (bus, events) = tray_engine::attach(&con, &config).await.context("Failed to start the StatusNotifierWatcher")?;
    let mut engine = TrayEngine::new(bus, events, config.clone());

    #[cfg(feature = "x11")]
    let mut xembed = if opts.no_xembed { None } else { legacy::start(&config) };
    #[cfg(feature = "x11")]
    let mut x_poll = tokio::time::interval(X_POLL_INTERVAL);

    loop {
        #[cfg(feature = "x11")]
        let x_tick = x_poll.tick();
        #[cfg(not(feature = "x11"))]
        let x_tick = std::future::pending::<()>();

        tokio::select! {
            alive = engine.wait_for_traffic() => {
                if !alive {
                    log::warn!("the watcher stopped, exiting");
                    break;
                }
                if engine.process().await {
                    redraw(&opts, &engine);
                    #[cfg(feature = "x11")]
                    if let Some(xembed) = xembed.as_mut() {
                        xembed.layout(opts.x + engine.row(opts.x, opts.y).width() + config.effective_gap(), opts.y);
                    }
                }
            }
            _ = x_tick => {
                #[cfg(feature = "x11")]
                if let Some(tray) = xembed.as_mut() {
                    match legacy::pump(tray) {
                        Ok(true) => {
                            let row_end = opts.x + engine.row(opts.x, opts.y).width() + config.effective_gap();
                            tray.layout(row_end, opts.y);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            log::error!("lost the X connection, legacy tray icons are gone: {:?}", e);
                            xembed = None;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, exiting");
                break;
            }
        }
    }

    log::info!("icon cache at exit: {:?}", engine.cache_stats());
    Ok(())
}

/// Stand-in for drawing: report what would be drawn.
fn redraw<B: TrayBus, L: tray_engine::cache::IconLoader>(opts: &opts::Opt, engine: &TrayEngine<B, L>) {
    let row = engine.row(opts.x, opts.y);
    for (idx, item) in engine.items().enumerate() {
        let icon = item.icon.as_ref().map(|icon| format!("{}x{}", icon.width(), icon.height()));
        log::debug!("slot {} at {:?}: {} icon={:?}", idx, row.anchor(idx), item.service, icon);
    }
    if opts.print {
        let items: Vec<_> = engine
            .items()
            .enumerate()
            .map(|(idx, item)| {
                serde_json::json!({
                    "service": item.service,
                    "path": item.path,
                    "menu": (!item.menu_path.is_empty()).then_some(&item.menu_path),
                    "anchor": row.anchor(idx),
                    "icon": item.icon.as_ref().map(|icon| [icon.width(), icon.height()]),
                    "activate": item.capabilities.activate,
                    "secondary_activate": item.capabilities.secondary_activate,
                    "context_menu": item.capabilities.context_menu,
                    "item_is_menu": item.capabilities.item_is_menu,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(items));
    }
}

#[cfg(feature = "x11")]
mod legacy {
    use anyhow::{Context, Result};
    use tray_engine::{
        xembed::{X11EmbedBackend, XEmbedTray},
        TrayConfig,
    };
    use x11rb::{connection::Connection, rust_connection::RustConnection};

    pub type LegacyTray = XEmbedTray<X11EmbedBackend<RustConnection>>;

    /// Take the X tray selection. Without an X server, only StatusNotifierItems are shown.
    pub fn start(config: &TrayConfig) -> Option<LegacyTray> {
        match connect(config) {
            Ok(tray) => Some(tray),
            Err(e) => {
                log::warn!("legacy tray icons are disabled: {:?}", e);
                None
            }
        }
    }

    fn connect(config: &TrayConfig) -> Result<LegacyTray> {
        let (conn, screen_num) = RustConnection::connect(None).context("Failed to connect to the X server")?;
        let backend = X11EmbedBackend::acquire(conn, screen_num).context("Failed to become the system tray")?;
        Ok(XEmbedTray::new(backend, config))
    }

    /// Handle all queued X events. Returns whether the embedded windows changed.
    pub fn pump(tray: &mut LegacyTray) -> Result<bool> {
        let mut changed = false;
        while let Some(event) = tray.backend().conn().poll_for_event()? {
            if let Some(event) = tray.backend().translate(&event) {
                changed |= tray.handle_event(event);
            }
        }
        Ok(changed)
    }
}
