use crate::core::Core;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Shutdown {
    fn shutdown(self: &Arc<Self>);
}

/// Ctrl-C handling: the first signal asks the node to wind down cleanly
/// (finishing the current protocol step), repeated signals force an exit.
pub struct Signals {
    core: Arc<Core>,
    interrupts: AtomicU64,
}

impl Signals {
    pub fn new(core: Arc<Core>) -> Signals {
        Signals { core, interrupts: AtomicU64::new(0) }
    }

    pub fn init(self: &Arc<Signals>) {
        let core = self.core.clone();
        let signals = self.clone();
        ctrlc::set_handler(move || {
            let seen = signals.interrupts.fetch_add(1, Ordering::SeqCst);
            if seen >= 1 {
                println!("^SIGNAL - halting doind immediately");
                std::process::exit(1);
            }

            println!("^SIGNAL - shutting the node down... (CTRL+C again to halt)");
            core.shutdown();
        })
        .expect("Error setting signal handler");
    }
}
