use crate::core::Core;
use std::{sync::Arc, thread::JoinHandle};

/// A long-lived node subsystem running on one or more OS threads.
///
/// Services are registered with [`Core`], started together and stopped in
/// registration order on shutdown.
pub trait Service: Sync + Send {
    fn ident(self: Arc<Self>) -> &'static str;
    fn start(self: Arc<Self>, core: Arc<Core>) -> Vec<JoinHandle<()>>;
    fn stop(self: Arc<Self>);
}
