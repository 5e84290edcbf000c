//! RT-safe deferred deallocation for sample memory
//!
//! PCM sample data is held in `basedrop::Shared<T>` pointers. Dropping the
//! last reference anywhere - including under the device lock or on the mix
//! thread - only enqueues the allocation; the actual free happens on a
//! background collector thread where a multi-hundred-megabyte `munmap`
//! cannot stall the next mix callback.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Collection sweep interval. Reclamation latency is irrelevant; this only
/// bounds how long freed sample memory lingers.
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector is !Sync, so it lives on the thread that sweeps it and
    // only a Handle escapes.
    thread::Builder::new()
        .name("soundfield-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("Failed to send GC handle");

            log::debug!("sample GC thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn sample GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `Shared<T>` sample memory.
///
/// The collector thread is spawned on first use; the handle is cheap to
/// clone.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
