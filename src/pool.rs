//! Worker pool sizing and construction (component N).
//!
//! Grounded in the `num_threads(scale)` calls scattered through `analyze_fs.c`
//! (`num_threads(1.0)` for hashing), `fullfiles.c` (`num_threads(3.0)` for
//! archiving) and `pack.c` (`sysconf(_SC_NPROCESSORS_ONLN)` for delta
//! building): pool size is a multiple of the detected CPU count, one call to
//! `threadpool::ThreadPool` per build phase, joined with a barrier before the
//! next phase starts.

use std::env;

use threadpool::ThreadPool;

/// Computes `NPROC * scale`, rounded down to at least 1, unless the
/// `NUM_THREADS` environment variable is set, in which case it wins outright.
pub fn num_threads(scale: f64) -> usize {
    if let Ok(v) = env::var("NUM_THREADS") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => log::warn!("ignoring malformed NUM_THREADS value '{}'", v),
        }
    }
    let nproc = num_cpus::get();
    ((nproc as f64) * scale).floor().max(1.0) as usize
}

/// Builds a named thread pool sized for the given phase.
pub fn scoped_pool(name: &str, scale: f64) -> ThreadPool {
    threadpool::Builder::new()
        .num_threads(num_threads(scale))
        .thread_name(name.to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        env::set_var("NUM_THREADS", "7");
        assert_eq!(7, num_threads(3.0));
        env::remove_var("NUM_THREADS");
    }

    #[test]
    fn scale_is_never_zero() {
        env::remove_var("NUM_THREADS");
        assert!(num_threads(0.01) >= 1);
    }
}
