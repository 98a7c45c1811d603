use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};

/// An XMPP address: `node@domain/resource`, where node and resource are optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn new(node: Option<&str>, domain: &str, resource: Option<&str>) -> Self {
        Self {
            node: node.filter(|n| !n.is_empty()).map(str::to_lowercase),
            domain: domain.to_lowercase(),
            resource: resource.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        let (address, resource) = match value.split_once('/') {
            Some((address, resource)) => (address, Some(resource)),
            None => (value, None),
        };

        let (node, domain) = match address.split_once('@') {
            Some((node, domain)) => (Some(node), domain),
            None => (None, address),
        };

        if domain.is_empty() {
            return Err(anyhow!("JID '{}' has no domain", value));
        }

        if node.is_some_and(str::is_empty) {
            return Err(anyhow!("JID '{}' has an empty node", value));
        }

        Ok(Self::new(node, domain, resource))
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn to_bare(&self) -> Jid {
        Self {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// `node@domain`, or just the domain for server addresses.
    pub fn bare(&self) -> String {
        match &self.node {
            Some(node) => format!("{}@{}", node, self.domain),
            None => self.domain.clone(),
        }
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", self.bare(), resource),
            None => write!(f, "{}", self.bare()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Normal,
    Chat,
    #[serde(rename = "groupchat")]
    GroupChat,
    Headline,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub kind: MessageType,
    pub from: Jid,
    pub to: Jid,

    #[serde(default)]
    pub body: Option<String>,
}

impl ChatMessage {
    pub fn new(kind: MessageType, from: Jid, to: Jid, body: Option<&str>) -> Self {
        Self {
            kind,
            from,
            to,
            body: body.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Message(ChatMessage),
    Presence { from: Jid, to: Option<Jid> },
    Iq { from: Jid, to: Option<Jid> },
}

/// Flags the routing pipeline passes with every intercepted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterceptContext {
    /// The packet was read from a client session rather than being sent to one.
    pub incoming: bool,
    /// The packet has already been delivered.
    pub processed: bool,
}

impl InterceptContext {
    pub fn inbound() -> Self {
        Self {
            incoming: true,
            processed: false,
        }
    }
}
