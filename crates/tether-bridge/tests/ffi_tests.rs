//! C ABI tests against an installed global host

mod common;

use common::object;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::time::{Duration, Instant};
use tether_bridge::ffi::{install_global_host, tether_release_string, tether_run_command};
use tether_bridge::{
    CallContext, Client, Envelope, Host, Outcome, ReleaseFn, Releaser, StringHandoff,
    TrackingAllocator,
};

static INSTALL: Once = Once::new();
static ALLOCATOR: OnceLock<Arc<TrackingAllocator>> = OnceLock::new();
static RESULTS: Mutex<Option<HashMap<usize, String>>> = Mutex::new(None);

fn install() -> Arc<TrackingAllocator> {
    INSTALL.call_once(|| {
        let alloc = Arc::new(TrackingAllocator::new());
        let host = Host::builder()
            .allocator(alloc.clone())
            .handler("lookup", |_: &Map<String, Value>| -> Outcome {
                Outcome::success(object(json!({"id": 42})))
            })
            .handler("fail", |_: &Map<String, Value>| -> Outcome {
                Outcome::error("vault is locked")
            })
            .build()
            .unwrap();
        install_global_host(host).expect("global host installed once");
        let _ = ALLOCATOR.set(alloc);
    });
    ALLOCATOR.get().unwrap().clone()
}

/// Foreign deliver: copy the payload out, release it, accept
unsafe extern "C" fn deliver(context: CallContext, handoff: StringHandoff) -> bool {
    let text = handoff.to_utf8().unwrap_or_default();
    tether_release_string(handoff);
    RESULTS
        .lock()
        .unwrap()
        .get_or_insert_with(HashMap::new)
        .insert(context.into_raw(), text);
    true
}

/// Foreign deliver that refuses every payload
unsafe extern "C" fn refuse(_context: CallContext, _handoff: StringHandoff) -> bool {
    false
}

fn run(context: usize, input: &[u8]) -> bool {
    unsafe {
        tether_run_command(
            CallContext::from_raw(context),
            input.as_ptr(),
            input.len(),
            Some(deliver),
        )
    }
}

fn wait_for(context: usize) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(text) = RESULTS
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|results| results.remove(&context))
        {
            return text;
        }
        assert!(Instant::now() < deadline, "no delivery for context {}", context);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_balanced(alloc: &TrackingAllocator) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !alloc.is_balanced() {
        assert!(Instant::now() < deadline, "allocations never released");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ===== tether_run_command =====

#[test]
fn test_run_command_delivers_success() {
    install();

    assert!(run(1001, br#"{"command":"lookup"}"#));

    assert_eq!(wait_for(1001), r#"{"success":true,"data":{"id":42}}"#);
}

#[test]
fn test_run_command_delivers_failure() {
    install();

    assert!(run(1002, br#"{"command":"fail","params":{}}"#));

    assert_eq!(
        Envelope::decode(wait_for(1002).as_bytes()).unwrap(),
        Envelope::Failure("vault is locked".to_string())
    );
}

#[test]
fn test_run_command_without_deliver() {
    install();
    let input = br#"{"command":"lookup"}"#;

    let scheduled = unsafe {
        tether_run_command(CallContext::from_raw(1003), input.as_ptr(), input.len(), None)
    };

    assert!(!scheduled);
}

#[test]
fn test_run_command_null_input() {
    install();

    let scheduled = unsafe {
        tether_run_command(CallContext::from_raw(1004), std::ptr::null(), 0, Some(deliver))
    };

    assert!(scheduled);
    match Envelope::decode(wait_for(1004).as_bytes()).unwrap() {
        Envelope::Failure(message) => {
            assert!(message.starts_with("invalid command input:"), "{}", message)
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_refused_delivery_is_released() {
    let alloc = install();
    let input = br#"{"command":"lookup"}"#;

    let scheduled = unsafe {
        tether_run_command(CallContext::from_raw(1005), input.as_ptr(), input.len(), Some(refuse))
    };

    assert!(scheduled);
    wait_balanced(&alloc);
    assert!(alloc.violations().is_empty());
}

// ===== tether_release_string =====

#[test]
fn test_release_empty_is_noop() {
    install();
    unsafe { tether_release_string(StringHandoff::empty()) };
}

#[test]
fn test_foreign_releaser_through_c_entry_point() {
    let alloc = install();
    let host = tether_bridge::ffi::global_host().unwrap();
    let release_fn: ReleaseFn = tether_release_string;

    let handoff = host.run_command_inline(br#"{"command":"lookup"}"#);
    Releaser::Foreign(release_fn).release(handoff).unwrap();

    wait_balanced(&alloc);
}

#[tokio::test]
async fn test_client_over_global_host() {
    install();
    let host = tether_bridge::ffi::global_host().unwrap();

    /// Borrowed transport over the process-wide host
    struct Global(&'static Host);

    impl tether_bridge::CommandTransport for Global {
        fn run_command(
            &self,
            context: CallContext,
            input: &[u8],
            sink: Arc<dyn tether_bridge::DeliverySink>,
        ) -> bool {
            self.0.run_command(context, input, sink)
        }

        fn releaser(&self) -> Releaser {
            Releaser::Foreign(tether_release_string)
        }
    }

    let client = Client::new(Arc::new(Global(host)));
    let value = client.call("lookup", Map::new()).await.unwrap();

    assert_eq!(value, json!({"id": 42}));
}
