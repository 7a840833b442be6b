//! Authorization policy resources. The engine forwards these verbatim to
//! the policy collaborator; only the identity fields are interpreted here.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Authorization {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(enumeration = "Scope", tag = "3")]
    pub scope: i32,
    #[prost(enumeration = "Action", tag = "4")]
    pub action: i32,
    #[prost(message, repeated, tag = "5")]
    pub rules: Vec<Rule>,
}

impl Authorization {
    /// Policies are keyed by `namespace/name`, or the bare name for
    /// cluster-scoped ones.
    pub fn resource_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rule {
    #[prost(message, repeated, tag = "1")]
    pub clauses: Vec<Clause>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Clause {
    #[prost(message, repeated, tag = "1")]
    pub matches: Vec<Match>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Match {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub source_ips: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub not_source_ips: Vec<Vec<u8>>,
    #[prost(string, repeated, tag = "3")]
    pub principals: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub not_principals: Vec<String>,
    #[prost(uint32, repeated, tag = "5")]
    pub destination_ports: Vec<u32>,
    #[prost(uint32, repeated, tag = "6")]
    pub not_destination_ports: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Scope {
    Global = 0,
    Namespace = 1,
    WorkloadSelector = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    Allow = 0,
    Deny = 1,
}
