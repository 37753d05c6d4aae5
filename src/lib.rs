#[macro_use]
extern crate log;

use anyhow::Context;

use crate::config::Config;
use crate::session::Session;
use crate::source::Stdin;
use crate::state::SessionState;

pub mod config;
pub mod connector;
pub mod handshake;
pub mod relay;
pub mod session;
pub mod source;
pub mod state;

/// Read size used when no page size can be queried.
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Upper bound for a single read: one page, which is also what a pipe writes atomically.
pub fn chunk_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size > 0 {
        page_size as usize
    } else {
        DEFAULT_CHUNK_SIZE
    }
}

/// Proxies the process's stdin/stdout to the configured channel.
///
/// Must run on a current-thread runtime: the proxy is a single cooperative loop. Returns
/// the closed state the session ended in.
pub async fn run(config: Config) -> anyhow::Result<SessionState> {
    let mut input = Stdin::new().with_context(|| "Failed to prepare stdin")?;
    let stdout = std::io::stdout();
    let mut output = stdout.lock();

    let mut session = Session::new(&config);
    session.run(&mut input, &mut output).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_a_page() {
        let size = chunk_size();
        assert!(size >= 512);
        assert!(size.is_power_of_two());
    }
}
