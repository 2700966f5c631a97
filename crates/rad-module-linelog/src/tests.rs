//! Module-level tests driving `linelog` instances through the registry.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rad_config::{ConfigError, ConfigSection};
use rad_server::lifecycle::StructuredLifecycleReporter;
use rad_server::module::{ModuleInstance, dispatch};
use rad_server::{EventLoop, ModuleError, ModuleRegistry, Rcode, Request, Section};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct Sandbox {
    dir: TempDir,
    el: EventLoop,
}

impl Sandbox {
    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// A section for instance `name` writing to `relative` inside the
    /// sandbox.
    fn section(&self, name: &str, relative: &str) -> ConfigSection {
        ConfigSection::new(name)
            .with_pair("module", MODULE_NAME)
            .with_pair("filename", self.path(relative).display().to_string())
    }

    fn request(&self, user: &str) -> Request {
        let mut request = Request::new(7, &self.el);
        request.packet_mut().add("User-Name", user);
        request
    }
}

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox {
        dir: TempDir::new().expect("tempdir"),
        el: EventLoop::new(0),
    }
}

fn try_ready(section: ConfigSection) -> Result<ModuleRegistry, ModuleError> {
    let mut registry = ModuleRegistry::new();
    registry.register_module(module())?;
    let name = section.name().to_owned();
    registry.add_instance(&name, section)?;
    let reporter = StructuredLifecycleReporter::new();
    registry.bootstrap(&reporter)?;
    registry.instantiate(&reporter)?;
    Ok(registry)
}

fn ready(section: ConfigSection) -> (ModuleRegistry, Arc<ModuleInstance>) {
    let name = section.name().to_owned();
    let registry = try_ready(section).expect("linelog instance");
    let instance = Arc::clone(registry.find(&name).expect("instance"));
    (registry, instance)
}

fn call(instance: &Arc<ModuleInstance>, section: Section, request: &mut Request) -> Rcode {
    dispatch::call(instance, section, request).rcode()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("log file")
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn every_section_but_session_logs() {
    let descriptor = module();
    for section in Section::ALL {
        assert_eq!(
            descriptor.methods().get(section).is_some(),
            section != Section::Session,
            "{section:?}"
        );
    }
}

#[rstest]
fn session_calls_are_noop(sandbox: Sandbox) {
    let (_registry, instance) =
        ready(sandbox.section("linelog", "detail").with_pair("format", "x"));
    let mut request = sandbox.request("bob");

    assert_eq!(call(&instance, Section::Session, &mut request), Rcode::Noop);
    assert!(!sandbox.path("detail").exists());
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

#[test]
fn filename_is_required() {
    let section = ConfigSection::new("linelog").with_pair("format", "x");
    let err = try_ready(section).expect_err("no filename");
    assert!(matches!(
        err,
        ModuleError::Config {
            source: ConfigError::MissingItem { ref item, .. },
            ..
        } if item == "filename"
    ));
}

#[test]
fn format_or_reference_is_required() {
    let section = ConfigSection::new("linelog").with_pair("filename", "syslog");
    let err = try_ready(section).expect_err("nothing to log");
    assert!(matches!(
        err,
        ModuleError::Lifecycle {
            phase: LifecyclePhase::Instantiate,
            ..
        }
    ));
}

#[rstest]
#[case::facility("syslog", "syslog_facility", "local9")]
#[case::severity("syslog", "syslog_severity", "loud")]
#[case::facility_with_file_output("/tmp/linelog-detail", "syslog_facility", "local9")]
#[case::severity_with_file_output("/tmp/linelog-detail", "syslog_severity", "loud")]
fn syslog_names_are_validated(#[case] filename: &str, #[case] item: &str, #[case] value: &str) {
    let section = ConfigSection::new("linelog")
        .with_pair("filename", filename)
        .with_pair("format", "x")
        .with_pair(item, value);
    let err = try_ready(section).expect_err("bad syslog setting");
    assert!(matches!(
        err,
        ModuleError::Config {
            source: ConfigError::InvalidValue { item: ref found, .. },
            ..
        } if found == item
    ));
}

#[test]
fn bad_permissions_fail_bootstrap() {
    let section = ConfigSection::new("linelog")
        .with_pair("filename", "syslog")
        .with_pair("format", "x")
        .with_pair("permissions", "rw-r--r--");
    assert!(matches!(
        try_ready(section),
        Err(ModuleError::Config { .. })
    ));
}

// ---------------------------------------------------------------------------
// File output
// ---------------------------------------------------------------------------

#[rstest]
fn format_is_expanded_and_escaped(sandbox: Sandbox) {
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "detail")
            .with_pair("format", "user=%{User-Name} 100%%"),
    );

    let mut request = sandbox.request("bob");
    assert_eq!(call(&instance, Section::Accounting, &mut request), Rcode::Ok);
    let mut hostile = sandbox.request("evil\nname\\");
    assert_eq!(call(&instance, Section::PostAuth, &mut hostile), Rcode::Ok);

    assert_eq!(
        read(&sandbox.path("detail")),
        "user=bob 100%\nuser=evil\\nname\\\\ 100%\n"
    );
}

#[rstest]
fn directories_and_file_are_created_with_modes(sandbox: Sandbox) {
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "acct/%{User-Name}/detail")
            .with_pair("format", "%{User-Name}")
            .with_pair("permissions", "0640"),
    );
    let mut request = sandbox.request("carol");

    assert_eq!(call(&instance, Section::Accounting, &mut request), Rcode::Ok);

    let file = sandbox.path("acct/carol/detail");
    assert_eq!(read(&file), "carol\n");
    let dir_mode = fs::metadata(sandbox.path("acct/carol"))
        .expect("dir")
        .permissions()
        .mode();
    assert_eq!(dir_mode & 0o777, 0o700);
    let file_mode = fs::metadata(&file).expect("file").permissions().mode();
    assert_eq!(file_mode & 0o777, 0o640);
}

#[rstest]
#[case::safe("no", "a_b.log")]
#[case::escaped("yes", "a-2fb.log")]
fn filename_values_cannot_add_directories(
    sandbox: Sandbox,
    #[case] escape_filenames: &str,
    #[case] expected: &str,
) {
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "%{User-Name}.log")
            .with_pair("format", "line")
            .with_pair("escape_filenames", escape_filenames),
    );
    let mut request = sandbox.request("a/b");

    assert_eq!(call(&instance, Section::Authorize, &mut request), Rcode::Ok);
    assert_eq!(read(&sandbox.path(expected)), "line\n");
    assert!(!sandbox.path("a").exists());
}

#[rstest]
fn files_stay_open_between_requests(sandbox: Sandbox) {
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "detail")
            .with_pair("format", "%{User-Name}"),
    );
    for user in ["a", "b", "c"] {
        let mut request = sandbox.request(user);
        assert_eq!(call(&instance, Section::Accounting, &mut request), Rcode::Ok);
    }

    assert_eq!(read(&sandbox.path("detail")), "a\nb\nc\n");
    let linelog = instance.data::<Linelog>().expect("linelog data");
    assert_eq!(linelog.open_files(), 1);
}

#[rstest]
fn own_group_is_accepted(sandbox: Sandbox) {
    let gid = nix::unistd::getgid().as_raw().to_string();
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "detail")
            .with_pair("format", "x")
            .with_pair("group", gid),
    );
    let mut request = sandbox.request("bob");

    assert_eq!(call(&instance, Section::Accounting, &mut request), Rcode::Ok);
    assert_eq!(read(&sandbox.path("detail")), "x\n");
}

#[rstest]
fn unwritable_location_fails(sandbox: Sandbox) {
    fs::write(sandbox.path("blocker"), "").expect("blocker file");
    let (_registry, instance) = ready(
        sandbox
            .section("linelog", "blocker/detail")
            .with_pair("format", "x"),
    );
    let mut request = sandbox.request("bob");

    assert_eq!(call(&instance, Section::Accounting, &mut request), Rcode::Fail);
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

fn referencing(sandbox: &Sandbox) -> ConfigSection {
    sandbox
        .section("linelog", "detail")
        .with_pair("format", "fallback %{User-Name}")
        .with_pair("reference", "messages.%{reply:Packet-Type}")
        .with_section(
            ConfigSection::new("messages")
                .with_pair("Access-Accept", "accepted %{User-Name}")
                .with_pair("Access-Reject", "")
                .with_word("Access-Challenge")
                .with_section(ConfigSection::new("Accounting-Response")),
        )
}

#[rstest]
#[case::found("Access-Accept", Rcode::Ok, Some("accepted bob\n"))]
#[case::empty_value("Access-Reject", Rcode::Ok, None)]
#[case::missing("CoA-ACK", Rcode::Noop, None)]
#[case::valueless("Access-Challenge", Rcode::Ok, Some("fallback bob\n"))]
#[case::subsection("Accounting-Response", Rcode::Ok, Some("fallback bob\n"))]
fn reference_selects_the_line(
    sandbox: Sandbox,
    #[case] packet_type: &str,
    #[case] rcode: Rcode,
    #[case] logged: Option<&str>,
) {
    let (_registry, instance) = ready(referencing(&sandbox));
    let mut request = sandbox.request("bob");
    request.reply_mut().add("Packet-Type", packet_type);

    assert_eq!(call(&instance, Section::PostAuth, &mut request), rcode);
    let file = sandbox.path("detail");
    match logged {
        Some(line) => assert_eq!(read(&file), line),
        None => assert!(!file.exists()),
    }
}

#[rstest]
fn reference_cannot_climb_out_of_the_section(sandbox: Sandbox) {
    let (_registry, instance) = ready(
        sandbox
            .section("climber", "climb")
            .with_pair("format", "fallback")
            .with_pair("reference", ".%{User-Name}"),
    );
    let mut request = sandbox.request("modules");

    assert_eq!(call(&instance, Section::Authorize, &mut request), Rcode::Ok);
    assert_eq!(read(&sandbox.path("climb")), "fallback\n");
}

// ---------------------------------------------------------------------------
// Syslog output
// ---------------------------------------------------------------------------

#[rstest]
fn syslog_output_succeeds(sandbox: Sandbox) {
    let (_registry, instance) = ready(
        ConfigSection::new("linelog")
            .with_pair("filename", "syslog")
            .with_pair("syslog_facility", "local7")
            .with_pair("syslog_severity", "debug")
            .with_pair("format", "linelog test %{User-Name}"),
    );
    let mut request = sandbox.request("bob");

    assert_eq!(call(&instance, Section::Authorize, &mut request), Rcode::Ok);
    let linelog = instance.data::<Linelog>().expect("linelog data");
    assert_eq!(linelog.open_files(), 0);
}
