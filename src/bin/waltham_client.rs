//! Waltham Client Binary
//!
//! Demo client: connect ke server lokal, jalankan handshake registry,
//! bind `wthp_compositor`, buat satu region, lalu tutup.
//!
//! Usage:
//!   cargo run --release --bin waltham_client

use tracing::{error, info, warn};

use waltham::config::{init_tracing, ClientConfig};
use waltham::network::{Event, RemoteDisplay};
use waltham::protocol::interfaces::WTHP_COMPOSITOR;
use waltham::Result;

fn run(config: &ClientConfig) -> Result<()> {
    let mut display = RemoteDisplay::connect(config.server_addr, config.max_objects)?;
    info!(addr = %config.server_addr, "connected");

    display.client_version(1)?;
    let registry = display.get_registry()?;

    let mut compositor = None;
    for event in display.roundtrip()? {
        match event {
            Event::ServerVersion(v) => info!(version = v, "server version"),
            Event::Global {
                name,
                interface,
                version,
                ..
            } => {
                info!(name, %interface, version, "global");
                if interface == WTHP_COMPOSITOR.name {
                    compositor = Some((name, version));
                }
            }
            _ => {}
        }
    }

    let Some((name, version)) = compositor else {
        warn!("server does not advertise wthp_compositor");
        return Ok(());
    };

    let compositor = display.bind(registry, name, &WTHP_COMPOSITOR, version)?;
    let region = display.create_region(compositor)?;
    display.region_add(region, 0, 0, 640, 480)?;
    display.region_subtract(region, 100, 100, 50, 50)?;
    display.destroy(region)?;
    display.destroy(registry)?;
    display.roundtrip()?;

    let live = display.live_ids();
    info!(?live, "done");
    Ok(())
}

fn main() {
    let config = ClientConfig::default();
    init_tracing(config.log_level);

    if let Err(e) = run(&config) {
        error!(error = %e, "client failed");
        std::process::exit(1);
    }
}
