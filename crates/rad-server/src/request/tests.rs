//! Unit tests for requests and their async context.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn el() -> EventLoop {
    EventLoop::new(0)
}

fn reply_always(request: &mut Request, _action: IoAction) -> IoFinal {
    request.reply_mut().set("Reply-Message", "custom");
    IoFinal::Reply
}

#[rstest]
fn new_request_defaults(el: EventLoop) {
    let request = Request::new(9, &el);
    assert_eq!(request.number(), 9);
    assert_eq!(request.namespace(), DEFAULT_NAMESPACE);
    assert!(request.server().is_none());
    assert!(request.section().is_none());
    assert!(!request.is_fake());
    assert!(!request.is_detachable());
    assert_eq!(request.io_state(), IoState::Runnable);
    assert_eq!(request.master_state(), MasterState::Running);
    assert_eq!(request.rcode(), Rcode::Noop);
    assert_eq!(request.stack_depth(), 0);
    assert_eq!(request.event_loop().map(|handle| handle.worker()), Some(0));
}

#[rstest]
fn listener_is_not_owned(el: EventLoop) {
    let listener = Arc::new(Listener::new("auth"));
    let request = Request::new(1, &el).with_listener(&listener);
    assert_eq!(request.listener().as_deref(), Some(&*listener));

    drop(listener);
    assert!(request.listener().is_none());
}

#[rstest]
fn own_recv_time_tracker(el: EventLoop) {
    let request = Request::new(1, &el);
    let later = request.recv_time() + Duration::from_secs(5);
    request.set_recv_time(later);
    assert_eq!(request.recv_time(), later);
    assert_eq!(request.original_recv_time(), later);
}

#[rstest]
fn custom_process_function_is_used(el: EventLoop) {
    let mut request = Request::new(1, &el).with_process(reply_always);
    assert_eq!(request.process(IoAction::Run), IoFinal::Reply);
    assert_eq!(request.reply().get("Reply-Message"), Some("custom"));
}

#[rstest]
fn stop_processing_changes_master_state(el: EventLoop) {
    let mut request = Request::new(1, &el);
    request.stop_processing();
    assert_eq!(request.master_state(), MasterState::StopProcessing);
}

// ---------------------------------------------------------------------------
// Children
// ---------------------------------------------------------------------------

fn parent(el: &EventLoop, listener: &Arc<Listener>) -> Request {
    let mut request = Request::new(42, el)
        .with_listener(listener)
        .with_namespace("dhcp")
        .with_section(Section::Accounting);
    request.packet_mut().add("User-Name", "alice");
    request.control_mut().add("Auth-Type", "Accept");
    request.reply_mut().add("Reply-Message", "parent only");
    request
}

#[rstest]
fn child_copies_identity_and_context(el: EventLoop) {
    let listener = Arc::new(Listener::new("acct"));
    let parent = parent(&el, &listener);

    let child = Request::new_child(&parent, None, None, None, process_interpret);

    assert_eq!(child.number(), 42);
    assert_eq!(child.namespace(), "dhcp");
    assert_eq!(child.section(), Some(Section::Accounting));
    assert_eq!(child.listener().as_deref(), Some(&*listener));
    assert_eq!(child.recv_time(), parent.recv_time());
    assert_eq!(child.packet().get("User-Name"), Some("alice"));
    assert_eq!(child.control().get("Auth-Type"), Some("Accept"));
    assert!(child.reply().is_empty());
    assert!(child.is_fake());
    assert!(!child.is_detachable());
    assert_eq!(child.stack_depth(), 0);
}

#[rstest]
fn child_namespace_override(el: EventLoop) {
    let listener = Arc::new(Listener::new("acct"));
    let parent = parent(&el, &listener);
    let child = Request::new_child(&parent, None, Some("vmps".to_owned()), None, process_interpret);
    assert_eq!(child.namespace(), "vmps");
}

#[rstest]
fn child_recv_time_is_independent(el: EventLoop) {
    let listener = Arc::new(Listener::new("auth"));
    let parent = parent(&el, &listener);
    let child = Request::new_child(&parent, None, None, None, process_interpret);
    let seeded = child.recv_time();

    assert!(!child.shares_recv_time_with(&parent));
    assert!(!parent.shares_recv_time_with(&child));

    parent.set_recv_time(seeded + Duration::from_secs(30));
    assert_eq!(child.recv_time(), seeded);
    assert_eq!(child.original_recv_time(), seeded);

    drop(parent);
    assert_eq!(child.original_recv_time(), seeded);
}

#[rstest]
fn detachable_child_holds_a_tracking_slot(el: EventLoop) {
    let listener = Arc::new(Listener::new("auth"));
    let parent = parent(&el, &listener);
    let slot = el.reserve_detached().expect("slot");

    let child = Request::new_child(&parent, None, None, Some(slot), process_interpret);
    assert!(child.is_detachable());
    assert_eq!(el.detached_count(), 1);

    drop(child);
    assert_eq!(el.detached_count(), 0);
}
