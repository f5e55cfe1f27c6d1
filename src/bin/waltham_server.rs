//! Waltham Server Binary
//!
//! Reference server: listen di 0.0.0.0:34400, advertise `wthp_compositor`
//! versi 4, layani semua client dari satu thread reactor.
//!
//! SIGINT pertama → shutdown bersih (exit 0). SIGINT kedua → abort.
//!
//! Usage:
//!   cargo run --release --bin waltham_server

use tracing::{error, info};

use waltham::config::{init_tracing, ServerConfig};
use waltham::network::{Server, Shutdown};

#[cfg(unix)]
mod signals {
    use std::io;
    use std::mem::MaybeUninit;

    use tracing::{info, warn};
    use waltham::network::Shutdown;

    fn sigint_set() -> libc::sigset_t {
        // SAFETY: sigemptyset menginisialisasi seluruh set
        unsafe {
            let mut set = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(set.as_mut_ptr());
            let mut set = set.assume_init();
            libc::sigaddset(&mut set, libc::SIGINT);
            set
        }
    }

    /// Block SIGINT for this thread and every thread spawned after it.
    pub fn block_sigint() -> io::Result<()> {
        let set = sigint_set();
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    /// Wait for SIGINT on a dedicated thread.
    pub fn spawn_watcher(shutdown: Shutdown) -> io::Result<()> {
        std::thread::Builder::new()
            .name("sigint".into())
            .spawn(move || {
                let set = sigint_set();
                let mut received = 0;
                loop {
                    let mut sig: libc::c_int = 0;
                    let rc = unsafe { libc::sigwait(&set, &mut sig) };
                    if rc != 0 {
                        warn!(error = %io::Error::from_raw_os_error(rc), "sigwait failed");
                        return;
                    }
                    received += 1;
                    if received > 1 {
                        warn!("second SIGINT, aborting");
                        std::process::abort();
                    }
                    info!("SIGINT received, shutting down");
                    shutdown.trigger();
                }
            })?;
        Ok(())
    }
}

fn install_signal_handling(shutdown: Shutdown) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        signals::block_sigint()?;
        signals::spawn_watcher(shutdown)?;
    }
    #[cfg(not(unix))]
    drop(shutdown);
    Ok(())
}

fn main() {
    let config = ServerConfig::default();
    init_tracing(config.log_level);

    let mut server = match Server::bind(config.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = install_signal_handling(server.shutdown_handle()) {
        error!(error = %e, "failed to install SIGINT handling");
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        error!(error = %e, "reactor failed");
        std::process::exit(1);
    }
    info!("bye");
}
