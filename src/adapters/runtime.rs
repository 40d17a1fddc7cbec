//! Typed commands over the proxy control channel.
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use serde::Serialize;

use crate::{
    core::{
        error::{ControlError, ControlResult},
        model::{validate_name, validate_token},
    },
    ports::control_channel::ControlChannel,
    utils::wire::{self, Row},
};

/// `proxy -> svname -> field -> value`
pub type StatsMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// How a known reply phrase is reported
#[derive(Debug, Clone, Copy)]
enum Sentinel {
    NoSuchServer,
    NoSuchBackend,
    Rejected,
}

/// Reply phrases the proxy uses to refuse a command. Matched after trimming
/// surrounding whitespace, so the trailing blank line of a reply is optional.
const REPLY_SENTINELS: &[(&str, Sentinel)] = &[
    ("No such server.", Sentinel::NoSuchServer),
    ("No such backend.", Sentinel::NoSuchBackend),
    ("Unknown command", Sentinel::Rejected),
    ("Unknown ACL", Sentinel::Rejected),
    ("Require ", Sentinel::Rejected),
    ("Permission denied", Sentinel::Rejected),
];

/// Map the reply of a state-changing command to a typed result.
///
/// `target` names the entity the command addressed, for error messages.
pub fn interpret_reply(target: &str, reply: &str) -> ControlResult<()> {
    let reply = reply.trim();
    let matched = REPLY_SENTINELS
        .iter()
        .find(|(phrase, _)| reply.starts_with(phrase))
        .map(|(_, sentinel)| *sentinel);

    match matched {
        None => Ok(()),
        Some(Sentinel::NoSuchServer) => Err(ControlError::not_found("server", target)),
        Some(Sentinel::NoSuchBackend) => Err(ControlError::not_found("backend", target)),
        Some(Sentinel::Rejected) => Err(ControlError::bad_request(format!(
            "proxy rejected command for '{target}': {reply}"
        ))),
    }
}

/// Row selection for `show stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsKind {
    #[default]
    All,
    Frontend,
    Backend,
    Server,
}

impl StatsKind {
    pub fn command(&self) -> &'static str {
        match self {
            StatsKind::All => "show stat -1",
            StatsKind::Frontend => "show stat -1 1 -1",
            StatsKind::Backend => "show stat -1 2 -1",
            StatsKind::Server => "show stat -1 4 -1",
        }
    }
}

impl FromStr for StatsKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(StatsKind::All),
            "frontend" | "frontends" => Ok(StatsKind::Frontend),
            "backend" | "backends" => Ok(StatsKind::Backend),
            "server" | "servers" => Ok(StatsKind::Server),
            other => Err(ControlError::bad_request(format!(
                "unknown stats kind '{other}', expected all, frontend, backend or server"
            ))),
        }
    }
}

impl fmt::Display for StatsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatsKind::All => "all",
            StatsKind::Frontend => "frontend",
            StatsKind::Backend => "backend",
            StatsKind::Server => "server",
        };
        f.write_str(name)
    }
}

/// Reply of `show info`
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ProxyInfo(BTreeMap<String, String>);

impl ProxyInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("Name")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("Version")
    }

    pub fn pid(&self) -> Option<u32> {
        self.get("Pid")?.parse().ok()
    }

    pub fn uptime(&self) -> Option<&str> {
        self.get("Uptime")
    }

    pub fn current_connections(&self) -> Option<u64> {
        self.get("CurrConns")?.parse().ok()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// One `show stat` row with the commonly used fields typed
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatsEntry {
    pub pxname: String,
    pub svname: String,
    pub status: Option<String>,
    pub scur: Option<i64>,
    pub smax: Option<i64>,
    pub slim: Option<i64>,
    pub stot: Option<i64>,
    pub qcur: Option<i64>,
    pub qmax: Option<i64>,
    pub bin: Option<i64>,
    pub bout: Option<i64>,
    pub ereq: Option<i64>,
    pub econ: Option<i64>,
    pub eresp: Option<i64>,
    pub weight: Option<i64>,
    pub rate: Option<i64>,
    pub rate_max: Option<i64>,
    pub req_rate: Option<i64>,
    pub req_tot: Option<i64>,
}

impl StatsEntry {
    pub fn from_row(row: &Row) -> Self {
        let int = |key: &str| row.get(key).and_then(|v| v.parse().ok());
        let text = |key: &str| row.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            pxname: row.get("pxname").cloned().unwrap_or_default(),
            svname: row.get("svname").cloned().unwrap_or_default(),
            status: text("status"),
            scur: int("scur"),
            smax: int("smax"),
            slim: int("slim"),
            stot: int("stot"),
            qcur: int("qcur"),
            qmax: int("qmax"),
            bin: int("bin"),
            bout: int("bout"),
            ereq: int("ereq"),
            econ: int("econ"),
            eresp: int("eresp"),
            weight: int("weight"),
            rate: int("rate"),
            rate_max: int("rate_max"),
            req_rate: int("req_rate"),
            req_tot: int("req_tot"),
        }
    }
}

/// Group rows by proxy and service name.
pub fn stats_map(rows: Vec<Row>) -> StatsMap {
    let mut map = StatsMap::new();
    for mut row in rows {
        let (Some(pxname), Some(svname)) = (row.remove("pxname"), row.remove("svname")) else {
            continue;
        };
        map.entry(pxname).or_default().insert(svname, row);
    }
    map
}

/// Commands against the running proxy
#[derive(Clone)]
pub struct ProxyRuntime {
    channel: Arc<dyn ControlChannel>,
}

impl ProxyRuntime {
    pub fn new(channel: Arc<dyn ControlChannel>) -> Self {
        Self { channel }
    }

    pub async fn info(&self) -> ControlResult<ProxyInfo> {
        let reply = self.channel.execute("show info").await?;
        Ok(ProxyInfo(wire::parse_key_values(&reply)))
    }

    /// Raw stats rows keyed by field name.
    pub async fn stats(&self, kind: StatsKind) -> ControlResult<Vec<Row>> {
        let reply = self.channel.execute(kind.command()).await?;
        Ok(wire::parse_csv(&reply))
    }

    pub async fn stats_entries(&self, kind: StatsKind) -> ControlResult<Vec<StatsEntry>> {
        Ok(self.stats(kind).await?.iter().map(StatsEntry::from_row).collect())
    }

    pub async fn stats_map(&self, kind: StatsKind) -> ControlResult<StatsMap> {
        Ok(stats_map(self.stats(kind).await?))
    }

    /// Change the weight of a server in the live proxy only.
    pub async fn set_weight(&self, backend: &str, server: &str, weight: u32) -> ControlResult<()> {
        validate_name("backend", backend)?;
        validate_name("server", server)?;
        let target = format!("{backend}/{server}");
        let reply = self
            .channel
            .execute(&format!("set weight {target} {weight}"))
            .await?;
        interpret_reply(&target, &reply)?;
        tracing::info!("Set live weight of {} to {}", target, weight);
        Ok(())
    }

    pub async fn add_acl(&self, acl: &str, pattern: &str) -> ControlResult<()> {
        if acl.trim().is_empty() || pattern.trim().is_empty() {
            return Err(ControlError::bad_request("acl and pattern are required"));
        }
        validate_token("acl", acl)?;
        // the proxy splits commands on ';' and newlines
        if pattern.contains(|c: char| c == ';' || c.is_control()) {
            return Err(ControlError::bad_request(format!(
                "acl pattern '{}' must not contain ';' or control characters",
                pattern.escape_debug()
            )));
        }
        let reply = self
            .channel
            .execute(&format!("add acl {acl} {pattern}"))
            .await?;
        interpret_reply(acl, &reply)?;
        tracing::info!("Added pattern '{}' to acl {}", pattern, acl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::ports::control_channel::{ControlChannelError, ControlChannelResult};

    /// Answers every command with a fixed reply and records what was sent
    struct Scripted {
        reply: String,
        sent: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ControlChannel for Scripted {
        async fn execute(&self, command: &str) -> ControlChannelResult<String> {
            self.sent.lock().unwrap().push(command.to_string());
            Ok(self.reply.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl ControlChannel for Down {
        async fn execute(&self, _command: &str) -> ControlChannelResult<String> {
            Err(ControlChannelError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )))
        }
    }

    #[test]
    fn test_interpret_reply() {
        assert!(interpret_reply("be/srv", "\n").is_ok());
        assert!(interpret_reply("be/srv", "").is_ok());
        assert!(interpret_reply("be/srv", "No such server.\n\n").unwrap_err().is_not_found());
        assert!(interpret_reply("be/srv", "No such server.").unwrap_err().is_not_found());
        assert_eq!(
            interpret_reply("be/srv", "No such backend.\n\n").unwrap_err(),
            ControlError::not_found("backend", "be/srv")
        );
        assert!(matches!(
            interpret_reply("be/srv", "Unknown command. Please enter one of the following commands only :\n"),
            Err(ControlError::BadRequest(_))
        ));
    }

    #[test]
    fn test_stats_kind_commands() {
        assert_eq!(StatsKind::All.command(), "show stat -1");
        assert_eq!(StatsKind::Frontend.command(), "show stat -1 1 -1");
        assert_eq!(StatsKind::Backend.command(), "show stat -1 2 -1");
        assert_eq!(StatsKind::Server.command(), "show stat -1 4 -1");
        assert_eq!("Backends".parse::<StatsKind>().unwrap(), StatsKind::Backend);
        assert!("listeners".parse::<StatsKind>().is_err());
    }

    #[tokio::test]
    async fn test_set_weight_sends_command() {
        let channel = Scripted::new("\n");
        let runtime = ProxyRuntime::new(channel.clone());
        runtime.set_weight("shop", "shop.v1", 30).await.unwrap();
        assert_eq!(channel.sent.lock().unwrap()[0], "set weight shop/shop.v1 30");
    }

    #[tokio::test]
    async fn test_set_weight_unknown_server() {
        let runtime = ProxyRuntime::new(Scripted::new("No such server.\n\n"));
        let err = runtime.set_weight("shop", "nope", 30).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_add_acl() {
        let channel = Scripted::new("\n");
        let runtime = ProxyRuntime::new(channel.clone());
        runtime.add_acl("#0", "10.0.0.1").await.unwrap();
        assert_eq!(channel.sent.lock().unwrap()[0], "add acl #0 10.0.0.1");
        assert!(runtime.add_acl("", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_arguments_cannot_chain_commands() {
        let channel = Scripted::new("\n");
        let runtime = ProxyRuntime::new(channel.clone());

        for (acl, pattern) in [
            ("#0", "10.0.0.1; disable frontend shop"),
            ("#0", "10.0.0.1\ndisable frontend shop"),
            ("#0", "10.0.0.1\r"),
            ("#0;show", "10.0.0.1"),
            ("#0 x", "10.0.0.1"),
        ] {
            let err = runtime.add_acl(acl, pattern).await.unwrap_err();
            assert!(matches!(err, ControlError::BadRequest(_)), "{acl:?} {pattern:?}");
        }
        assert!(runtime.set_weight("shop;clear", "a", 1).await.is_err());
        assert!(runtime.set_weight("shop", "a\nshutdown", 1).await.is_err());
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_info() {
        let runtime = ProxyRuntime::new(Scripted::new(
            "Name: HAProxy\nVersion: 2.8.3\nPid: 811\nUptime: 0d 0h00m09s\nCurrConns: 2\n",
        ));
        let info = runtime.info().await.unwrap();
        assert_eq!(info.name(), Some("HAProxy"));
        assert_eq!(info.pid(), Some(811));
        assert_eq!(info.current_connections(), Some(2));
    }

    #[tokio::test]
    async fn test_stats_views() {
        let dump = "# pxname,svname,qcur,scur,status,weight,\nshop,FRONTEND,,3,OPEN,,\nshop.v1,BACKEND,0,1,UP,100,\nshop.v1,s1,0,1,UP,100,\n";
        let runtime = ProxyRuntime::new(Scripted::new(dump));

        let entries = runtime.stats_entries(StatsKind::All).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].scur, Some(3));
        assert_eq!(entries[0].qcur, None);
        assert_eq!(entries[1].status.as_deref(), Some("UP"));

        let map = runtime.stats_map(StatsKind::All).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["shop.v1"].len(), 2);
        assert_eq!(map["shop.v1"]["s1"]["weight"], "100");
    }

    #[tokio::test]
    async fn test_unreachable_channel() {
        let runtime = ProxyRuntime::new(Arc::new(Down));
        assert!(matches!(
            runtime.info().await,
            Err(ControlError::RuntimeUnavailable(_))
        ));
    }
}
