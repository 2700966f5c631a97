//! Virtual servers and the namespace registry that compiles them.
//!
//! A namespace (`radius`, `dhcp`, ...) registers a [`SectionCompiler`].
//! During [`VirtualServerRegistry::bootstrap`] each configured server is
//! compiled by the compiler of the namespace it names, producing one
//! [`Program`] per processing section.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rad_config::{Config, ConfigError, ConfigItem, ConfigSection, NAMESPACE_ITEM};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::event::EventLoop;
use crate::module::{ModuleRegistry, Section};
use crate::rcode::Rcode;
use crate::request::Request;
use crate::unlang::io::{IoAction, IoFinal, IoState, process_interpret};
use crate::unlang::{Cursor, Instruction, Program, SubrequestSpec};

const SERVER_TARGET: &str = "rad_server::virtual_server";

/// Option names recognised at the top level of a virtual server section.
pub const VIRTUAL_SERVER_OPTIONS: &[&str] = &[NAMESPACE_ITEM];

/// Reply attribute carrying the packet type chosen by the protocol.
pub const PACKET_TYPE_ATTR: &str = "Packet-Type";

/// Compiled sections of one server.
pub type SectionPrograms = BTreeMap<Section, Program>;

/// Compiles a server's section blocks.
///
/// The virtual-server registry holds the servers compiled so far, so a
/// compiler can resolve references to them.
pub type SectionCompiler =
    fn(&ConfigSection, &ModuleRegistry, &VirtualServerRegistry) -> Result<SectionPrograms, ServerError>;

/// A compiled virtual server.
pub struct VirtualServer {
    name: String,
    namespace: String,
    config: ConfigSection,
    sections: SectionPrograms,
}

impl VirtualServer {
    /// Server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace the server was compiled for.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Server configuration section.
    #[must_use]
    pub const fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Compiled program for `section`, if the server defines it.
    #[must_use]
    pub fn section(&self, section: Section) -> Option<&Program> {
        self.sections.get(&section)
    }

    /// Builds an external request that runs `section` of this server and
    /// answers through [`process_protocol`]. A server without the section
    /// yields a request that finishes with `noop`.
    #[must_use]
    pub fn request(self: &Arc<Self>, number: u64, el: &EventLoop, section: Section) -> Request {
        let mut request = Request::new(number, el)
            .with_server(Arc::clone(self))
            .with_section(section)
            .with_process(process_protocol);
        let program = self
            .sections
            .get(&section)
            .map_or_else(|| Program::from(Vec::new()), Arc::clone);
        request.push_instruction(Cursor::new(program), Rcode::Noop, true, true);
        request
    }
}

impl fmt::Debug for VirtualServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualServer")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("sections", &self.sections.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Process function for external requests.
///
/// Interprets like [`process_interpret`], then answers with a reply whose
/// `Packet-Type` reflects the section result. Signals, stop-processing,
/// finished requests and `fail` produce no reply.
pub fn process_protocol(request: &mut Request, action: IoAction) -> IoFinal {
    if request.io_state() == IoState::Done {
        return IoFinal::Done;
    }
    let outcome = process_interpret(request, action);
    if outcome != IoFinal::Done || matches!(action, IoAction::Signal(_)) {
        return outcome;
    }
    if request.master_state() != crate::request::MasterState::Running {
        return IoFinal::Done;
    }
    let Some(packet_type) = request
        .section()
        .and_then(|section| reply_packet_type(section, request.rcode()))
    else {
        return IoFinal::Done;
    };
    request.reply_mut().set(PACKET_TYPE_ATTR, packet_type);
    debug!(
        target: SERVER_TARGET,
        request = request.number(),
        rcode = %request.rcode(),
        packet_type,
        "reply ready"
    );
    IoFinal::Reply
}

/// Reply packet type for a section result, or `None` for no reply.
#[must_use]
pub const fn reply_packet_type(section: Section, rcode: Rcode) -> Option<&'static str> {
    let accepted = matches!(
        rcode,
        Rcode::Ok | Rcode::Updated | Rcode::Noop | Rcode::Handled
    );
    let rejected = matches!(
        rcode,
        Rcode::Reject | Rcode::Userlock | Rcode::Invalid | Rcode::Notfound
    );
    match section {
        Section::Authenticate | Section::Authorize | Section::PostAuth if accepted => {
            Some("Access-Accept")
        }
        Section::Authenticate | Section::Authorize | Section::PostAuth if rejected => {
            Some("Access-Reject")
        }
        Section::Preacct | Section::Accounting if accepted || rejected => {
            Some("Accounting-Response")
        }
        Section::RecvCoa | Section::SendCoa if accepted => Some("CoA-ACK"),
        Section::RecvCoa | Section::SendCoa if rejected => Some("CoA-NAK"),
        _ => None,
    }
}

/// Registry of namespaces and compiled virtual servers.
#[derive(Default)]
pub struct VirtualServerRegistry {
    namespaces: HashMap<String, SectionCompiler>,
    servers: HashMap<String, Arc<VirtualServer>>,
}

impl VirtualServerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `compiler` for servers in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateNamespace`] if the namespace is taken.
    pub fn register_namespace(
        &mut self,
        namespace: &str,
        compiler: SectionCompiler,
    ) -> Result<(), ServerError> {
        if self.namespaces.contains_key(namespace) {
            return Err(ServerError::DuplicateNamespace {
                namespace: namespace.to_owned(),
            });
        }
        self.namespaces.insert(namespace.to_owned(), compiler);
        Ok(())
    }

    /// Compiles every server in `config` against `modules`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or compilation error.
    pub fn bootstrap(&mut self, config: &Config, modules: &ModuleRegistry) -> Result<(), ServerError> {
        for section in config.servers() {
            let server = self.compile(section, modules)?;
            if self.servers.contains_key(server.name()) {
                return Err(ServerError::DuplicateServer {
                    server: server.name().to_owned(),
                });
            }
            info!(
                target: SERVER_TARGET,
                server = server.name(),
                namespace = server.namespace(),
                sections = server.sections.len(),
                "virtual server compiled"
            );
            self.servers
                .insert(server.name().to_owned(), Arc::new(server));
        }
        Ok(())
    }

    fn compile(
        &self,
        section: &ConfigSection,
        modules: &ModuleRegistry,
    ) -> Result<VirtualServer, ServerError> {
        let server = section.name();
        for pair in section.pairs() {
            if !VIRTUAL_SERVER_OPTIONS.contains(&pair.name()) {
                return Err(ServerError::Config {
                    server: server.to_owned(),
                    source: ConfigError::invalid_value(
                        server,
                        pair.name(),
                        pair.value().unwrap_or_default(),
                        "not a virtual server option",
                    ),
                });
            }
        }
        let namespace = section
            .pair(NAMESPACE_ITEM)
            .ok_or_else(|| ServerError::Config {
                server: server.to_owned(),
                source: ConfigError::missing_item(server, NAMESPACE_ITEM),
            })?;
        let compiler = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| ServerError::UnknownNamespace {
                server: server.to_owned(),
                namespace: namespace.to_owned(),
            })?;

        Ok(VirtualServer {
            name: server.to_owned(),
            namespace: namespace.to_owned(),
            config: section.clone(),
            sections: compiler(section, modules, self)?,
        })
    }

    /// Looks up a compiled server by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<VirtualServer>> {
        self.servers.get(name)
    }

    /// Returns `true` when `namespace` has a compiler.
    #[must_use]
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Number of compiled servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Returns `true` when no servers are compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl fmt::Debug for VirtualServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut namespaces: Vec<&String> = self.namespaces.keys().collect();
        namespaces.sort_unstable();
        f.debug_struct("VirtualServerRegistry")
            .field("namespaces", &namespaces)
            .field("servers", &self.servers.len())
            .finish()
    }
}

const GROUP_KEYWORD: &str = "group";
const SUBREQUEST_KEYWORD: &str = "subrequest";
const DETACH_KEYWORD: &str = "detach";
const SERVER_ITEM: &str = "server";
const SUBREQUEST_OPTIONS: &[&str] = &[NAMESPACE_ITEM, SERVER_ITEM];

/// Default section compiler.
///
/// Every subsection named after a [`Section`] becomes a program. Inside it,
/// bare words are result keywords (`ok`, `reject`, ...) or module instance
/// names, and `group`, `subrequest` and `detach` blocks nest.
///
/// A `subrequest` block may set `namespace = name` and `server = name`.
/// The server must already be compiled. Its namespace becomes the child's
/// unless one is given, and a block with no other items runs that server's
/// program for the enclosing section.
///
/// # Errors
///
/// Returns [`ServerError::Compile`] for unknown sections, unknown module
/// instances or servers, valued items and `yield` keywords.
pub fn compile_sections(
    server: &ConfigSection,
    modules: &ModuleRegistry,
    servers: &VirtualServerRegistry,
) -> Result<SectionPrograms, ServerError> {
    let mut programs = SectionPrograms::new();
    for block in server.subsections() {
        let section = Section::from_str(block.name()).map_err(|_| {
            ServerError::compile(
                server.name(),
                format!("'{}' is not a processing section", block.name()),
            )
        })?;
        let compiler = ListCompiler {
            server: server.name(),
            section,
            modules,
            servers,
        };
        programs.insert(section, compiler.compile(block)?);
    }
    Ok(programs)
}

struct ListCompiler<'a> {
    server: &'a str,
    section: Section,
    modules: &'a ModuleRegistry,
    servers: &'a VirtualServerRegistry,
}

impl ListCompiler<'_> {
    fn compile(&self, block: &ConfigSection) -> Result<Program, ServerError> {
        block
            .items()
            .iter()
            .map(|item| self.instruction(item))
            .collect::<Result<Vec<_>, _>>()
            .map(Program::from)
    }

    fn instruction(&self, item: &ConfigItem) -> Result<Instruction, ServerError> {
        match item {
            ConfigItem::Pair(pair) => {
                if let Some(value) = pair.value() {
                    return Err(self.error(format!(
                        "unexpected item '{} = {value}' in {}",
                        pair.name(),
                        self.section
                    )));
                }
                self.word(pair.name())
            }
            ConfigItem::Section(block) => self.block(block),
        }
    }

    fn word(&self, word: &str) -> Result<Instruction, ServerError> {
        if let Ok(rcode) = Rcode::from_str(word) {
            if rcode == Rcode::Yield {
                return Err(self.error("'yield' cannot be used as a keyword".to_owned()));
            }
            return Ok(Instruction::Rcode(rcode));
        }
        let instance = self
            .modules
            .find(word)
            .ok_or_else(|| self.error(format!("unknown module instance '{word}'")))?;
        Ok(Instruction::Module {
            instance: Arc::clone(instance),
            section: self.section,
        })
    }

    fn block(&self, block: &ConfigSection) -> Result<Instruction, ServerError> {
        match block.name() {
            GROUP_KEYWORD => Ok(Instruction::Group(self.compile(block)?)),
            DETACH_KEYWORD => Ok(Instruction::Detach(self.compile(block)?)),
            SUBREQUEST_KEYWORD => self.subrequest(block).map(Instruction::Subrequest),
            other => Err(self.error(format!("unknown block '{other}'"))),
        }
    }

    fn subrequest(&self, block: &ConfigSection) -> Result<SubrequestSpec, ServerError> {
        let target = block
            .pair(SERVER_ITEM)
            .map(|name| {
                self.servers
                    .find(name)
                    .map(Arc::clone)
                    .ok_or_else(|| self.error(format!("unknown virtual server '{name}'")))
            })
            .transpose()?;
        let namespace = block
            .pair(NAMESPACE_ITEM)
            .or_else(|| target.as_ref().map(|server| server.namespace()))
            .map(str::to_owned);
        let body = block
            .items()
            .iter()
            .filter(|item| !SUBREQUEST_OPTIONS.contains(&item.name()))
            .cloned()
            .fold(ConfigSection::new(block.name()), push_item);

        let program = match &target {
            Some(server) if body.items().is_empty() => server
                .section(self.section)
                .map_or_else(|| Program::from(Vec::new()), Arc::clone),
            _ => self.compile(&body)?,
        };
        Ok(SubrequestSpec {
            program,
            server: target,
            namespace,
        })
    }

    fn error(&self, message: String) -> ServerError {
        ServerError::compile(self.server, message)
    }
}

fn push_item(section: ConfigSection, item: ConfigItem) -> ConfigSection {
    match item {
        ConfigItem::Pair(pair) => match pair.value() {
            Some(value) => section.with_pair(pair.name(), value),
            None => section.with_word(pair.name()),
        },
        ConfigItem::Section(child) => section.with_section(child),
    }
}
