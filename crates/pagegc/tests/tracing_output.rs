//! Exercises the `tracing` feature's span/event output: installs a
//! subscriber that captures formatted records into a buffer and checks the
//! phase-boundary instrumentation `gc_collect` actually emits.

#![cfg(feature = "tracing")]

use std::sync::{Arc, Mutex};

use pagegc::{gc_alloc, gc_collect, gc_destroy, gc_init};

#[derive(Clone)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn stack_top() -> usize {
    let local = 0usize;
    std::hint::black_box(&local);
    std::ptr::addr_of!(local) as usize + (1 << 20)
}

#[test]
fn gc_collect_emits_mark_and_sweep_phase_events() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(CaptureWriter(buf.clone()))
        .with_max_level(tracing::Level::DEBUG)
        .without_time()
        .with_target(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    assert!(gc_init(stack_top(), false));
    let _ = gc_alloc(64);
    gc_collect();
    gc_destroy();

    let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(
        output.contains("gc_collect"),
        "expected the collection span in the tracing output:\n{output}"
    );
    assert!(
        output.contains("mark phase complete"),
        "expected a mark-phase event in the tracing output:\n{output}"
    );
    assert!(
        output.contains("sweep phase complete"),
        "expected a sweep-phase event in the tracing output:\n{output}"
    );
}
