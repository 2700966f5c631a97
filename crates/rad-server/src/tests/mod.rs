//! Crate-level integration and BDD tests.

use rad_config::Config;
use serde_json::json;

use crate::lifecycle::StructuredLifecycleReporter;
use crate::module::{ModuleRegistry, Section};
use crate::virtual_server::{PACKET_TYPE_ATTR, VirtualServerRegistry, compile_sections};
use crate::{EventLoop, IoAction, IoFinal, Rcode};

pub(crate) mod support;


fn server_config() -> Config {
    let document = json!({
        "log_filter": "rad_server=debug",
        "modules": {
            "files": { "module": "counter" },
            "sleepy": { "module": "pause", "rounds": "2" }
        },
        "servers": {
            "default": {
                "namespace": "radius",
                "authorize": ["files", "sleepy"],
                "accounting": ["files", "noop"]
            }
        }
    });
    Config::from_json_str(&document.to_string()).expect("config")
}

#[test]
fn end_to_end_configured_server_replies() {
    let config = server_config();

    let mut modules = ModuleRegistry::new();
    support::register_test_modules(&mut modules);
    modules.load(&config).expect("load");
    let reporter = StructuredLifecycleReporter::new();
    modules.bootstrap(&reporter).expect("bootstrap");
    modules.instantiate(&reporter).expect("instantiate");

    let mut servers = VirtualServerRegistry::new();
    servers
        .register_namespace("radius", compile_sections)
        .expect("namespace");
    servers.bootstrap(&config, &modules).expect("compile servers");
    let server = servers.find("default").expect("default server");

    let el = EventLoop::new(0);
    el.threads()
        .instantiate_all(&el, &modules)
        .expect("eager thread instances");

    let mut auth = server.request(1, &el, Section::Authorize);
    auth.packet_mut().add("User-Name", "carol");
    let mut polls = 0;
    let outcome = loop {
        polls += 1;
        match auth.process(IoAction::Run) {
            IoFinal::Yield => {}
            other => break other,
        }
    };
    assert_eq!(outcome, IoFinal::Reply);
    assert_eq!(polls, 3, "two resumptions after the first run");
    assert_eq!(auth.rcode(), Rcode::Updated);
    assert_eq!(auth.reply().get(PACKET_TYPE_ATTR), Some("Access-Accept"));

    let mut acct = server.request(2, &el, Section::Accounting);
    assert_eq!(acct.process(IoAction::Run), IoFinal::Reply);
    assert_eq!(acct.reply().get(PACKET_TYPE_ATTR), Some("Accounting-Response"));

    assert_eq!(el.threads().detach_all(), 2);
    modules.free();
}
