//! Capability handed to the command listener.

use alloc::vec::Vec;
use core::ops::Deref;

use crate::device::{SampleEngine, ShutdownFlag};

/// Read-only views into sampler state plus the single control action.
pub trait CommandTarget {
    fn total_samples(&self) -> u64;
    fn history_len(&self) -> usize;
    fn dip_count(&self) -> u32;
    fn history(&self) -> Vec<f64>;
    fn request_shutdown(&self);
}

/// `CommandTarget` backed by the live sample engine and the loop's stop flag.
#[derive(Clone, Debug)]
pub struct EngineCommands<S, F> {
    engine: S,
    shutdown: F,
}

impl<S, F> EngineCommands<S, F>
where
    S: SampleEngine,
    F: Deref<Target = ShutdownFlag>,
{
    pub fn new(engine: S, shutdown: F) -> Self {
        Self { engine, shutdown }
    }
}

impl<S, F> CommandTarget for EngineCommands<S, F>
where
    S: SampleEngine,
    F: Deref<Target = ShutdownFlag>,
{
    fn total_samples(&self) -> u64 {
        self.engine.total_samples()
    }

    fn history_len(&self) -> usize {
        self.engine.history_len()
    }

    fn dip_count(&self) -> u32 {
        self.engine.dip_count()
    }

    fn history(&self) -> Vec<f64> {
        self.engine.history()
    }

    fn request_shutdown(&self) {
        self.shutdown.request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::WindowSummary;

    struct Fixed;

    impl SampleEngine for Fixed {
        fn rotate_window(&self) -> WindowSummary {
            WindowSummary::default()
        }

        fn history(&self) -> Vec<f64> {
            alloc::vec![0.5, 0.75]
        }

        fn history_len(&self) -> usize {
            2
        }

        fn dip_count(&self) -> u32 {
            7
        }

        fn total_samples(&self) -> u64 {
            12_345
        }
    }

    #[test]
    fn forwards_queries_and_sets_flag() {
        let flag = ShutdownFlag::new();
        let engine = Fixed;
        let cmds = EngineCommands::new(&engine, &flag);

        assert_eq!(cmds.total_samples(), 12_345);
        assert_eq!(cmds.history_len(), 2);
        assert_eq!(cmds.dip_count(), 7);
        assert_eq!(cmds.history(), alloc::vec![0.5, 0.75]);
        assert!(!flag.is_requested());
        cmds.request_shutdown();
        assert!(flag.is_requested());
    }
}
