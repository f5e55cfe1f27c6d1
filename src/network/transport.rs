//! Byte-stream transport dengan scatter/gather I/O
//!
//! Connection hanya butuh dua operasi: kirim beberapa segment sekaligus
//! dan terima ke beberapa segment sekaligus. Menulis ke peer yang sudah
//! menutup socket TIDAK boleh mematikan proses lewat SIGPIPE; error-nya
//! dikembalikan sebagai `BrokenPipe` biasa.

use std::io::{self, IoSlice, IoSliceMut, Read};

/// Non-blocking (or blocking) scatter/gather stream.
pub trait Transport {
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;
    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;
}

impl Transport for mio::net::TcpStream {
    #[inline]
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        sys::send_vectored(self, bufs)
    }

    #[inline]
    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.read_vectored(bufs)
    }
}

impl Transport for std::net::TcpStream {
    #[inline]
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        sys::send_vectored(self, bufs)
    }

    #[inline]
    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.read_vectored(bufs)
    }
}

/// Set TCP_NODELAY; request/event traffic is small and latency bound.
pub fn tune_stream(stream: &mio::net::TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys {
    use std::io::{self, IoSlice};
    use std::os::unix::io::AsRawFd;

    /// `sendmsg` dengan MSG_NOSIGNAL: EPIPE jadi error biasa, tanpa SIGPIPE.
    pub fn send_vectored<S: AsRawFd>(stream: &S, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        // SAFETY: msghdr all-zero adalah nilai valid; IoSlice dijamin
        // ABI-compatible dengan iovec di Unix, dan `bufs` hidup selama call.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;

        let ret = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
mod sys {
    use std::io::{self, IoSlice, Write};
    use std::sync::Once;

    static IGNORE_SIGPIPE: Once = Once::new();

    /// Tanpa MSG_NOSIGNAL: SIGPIPE di-ignore sekali untuk seluruh proses.
    pub fn send_vectored<S: Write>(stream: &mut S, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        IGNORE_SIGPIPE.call_once(|| unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        });
        stream.write_vectored(bufs)
    }
}

#[cfg(not(unix))]
mod sys {
    use std::io::{self, IoSlice, Write};

    pub fn send_vectored<S: Write>(stream: &mut S, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        stream.write_vectored(bufs)
    }
}
