use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Stacks,
    Queues,
    Functions,
    Clusters,
    Services,
    Tasks,
    Apis,
    Stages,
    Tables,
}

impl ResourceKind {
    /// Kinds reachable from the tab bar. The rest are only reached by drilling
    /// into a parent row.
    pub const TABS: [Self; 6] = [
        Self::Stacks,
        Self::Queues,
        Self::Functions,
        Self::Clusters,
        Self::Apis,
        Self::Tables,
    ];

    pub const ALL: [Self; 9] = [
        Self::Stacks,
        Self::Queues,
        Self::Functions,
        Self::Clusters,
        Self::Services,
        Self::Tasks,
        Self::Apis,
        Self::Stages,
        Self::Tables,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Stacks => "Stacks",
            Self::Queues => "Queues",
            Self::Functions => "Functions",
            Self::Clusters => "Clusters",
            Self::Services => "Services",
            Self::Tasks => "Tasks",
            Self::Apis => "APIs",
            Self::Stages => "Stages",
            Self::Tables => "Tables",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "stack" | "stacks" | "cfn" | "cloudformation" => Some(Self::Stacks),
            "q" | "queue" | "queues" | "sqs" => Some(Self::Queues),
            "fn" | "func" | "function" | "functions" | "lambda" | "lambdas" => {
                Some(Self::Functions)
            }
            "cluster" | "clusters" | "ecs" => Some(Self::Clusters),
            "svc" | "service" | "services" => Some(Self::Services),
            "task" | "tasks" => Some(Self::Tasks),
            "api" | "apis" | "apigw" | "apigateway" | "gateway" | "gateways" => Some(Self::Apis),
            "stage" | "stages" => Some(Self::Stages),
            "table" | "tables" | "ddb" | "dynamo" | "dynamodb" => Some(Self::Tables),
            _ => None,
        }
    }

    pub fn short_token(self) -> &'static str {
        match self {
            Self::Stacks => "stack",
            Self::Queues => "sqs",
            Self::Functions => "fn",
            Self::Clusters => "ecs",
            Self::Services => "svc",
            Self::Tasks => "task",
            Self::Apis => "api",
            Self::Stages => "stage",
            Self::Tables => "ddb",
        }
    }

    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Stacks => &["Name", "Status", "Updated"],
            Self::Queues => &["Name", "Type", "Messages", "In Flight", "DLQ"],
            Self::Functions => &["Name", "Runtime", "Memory", "Timeout", "State"],
            Self::Clusters => &["Name", "Status", "Services", "Running"],
            Self::Services => &["Name", "Status", "Desired", "Running", "Launch"],
            Self::Tasks => &["Task", "Status", "Containers", "Ports", "Exec"],
            Self::Apis => &["Name", "Id", "Endpoint", "Created"],
            Self::Stages => &["Stage", "Deployment", "Endpoint", "Updated"],
            Self::Tables => &["Name", "Status", "Items", "Size", "Billing"],
        }
    }

    /// Kind whose rows contain this kind's rows.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Services => Some(Self::Clusters),
            Self::Tasks => Some(Self::Services),
            Self::Stages => Some(Self::Apis),
            _ => None,
        }
    }

    pub fn child(self) -> Option<Self> {
        match self {
            Self::Clusters => Some(Self::Services),
            Self::Services => Some(Self::Tasks),
            Self::Apis => Some(Self::Stages),
            _ => None,
        }
    }

    /// Resource type string used to pick members of a stack, if the kind can be scoped.
    pub fn stack_resource_type(self) -> Option<&'static str> {
        match self {
            Self::Stacks | Self::Tasks | Self::Stages => None,
            Self::Queues => Some("AWS::SQS::Queue"),
            Self::Functions => Some("AWS::Lambda::Function"),
            Self::Clusters => Some("AWS::ECS::Cluster"),
            Self::Services => Some("AWS::ECS::Service"),
            Self::Apis => Some("AWS::ApiGateway::RestApi"),
            Self::Tables => Some("AWS::DynamoDB::Table"),
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LoadScope {
    All,
    Stack(String),
    /// Children of one parent row, identified by the parent's id.
    Parent(String),
}

impl LoadScope {
    pub fn label(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Stack(stack) => stack.clone(),
            Self::Parent(id) => short_id(id).to_string(),
        }
    }
}

/// Last path segment of an ARN-like identifier.
pub fn short_id(id: &str) -> &str {
    id.rsplit(['/', ':']).next().unwrap_or(id)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub group: &'static str,
}

const fn region(code: &'static str, name: &'static str, group: &'static str) -> Region {
    Region { code, name, group }
}

pub const REGIONS: [Region; 18] = [
    region("us-east-1", "N. Virginia", "US"),
    region("us-east-2", "Ohio", "US"),
    region("us-west-1", "N. California", "US"),
    region("us-west-2", "Oregon", "US"),
    region("eu-west-1", "Ireland", "Europe"),
    region("eu-west-2", "London", "Europe"),
    region("eu-west-3", "Paris", "Europe"),
    region("eu-central-1", "Frankfurt", "Europe"),
    region("eu-north-1", "Stockholm", "Europe"),
    region("ap-southeast-1", "Singapore", "Asia Pacific"),
    region("ap-southeast-2", "Sydney", "Asia Pacific"),
    region("ap-northeast-1", "Tokyo", "Asia Pacific"),
    region("ap-northeast-2", "Seoul", "Asia Pacific"),
    region("ap-south-1", "Mumbai", "Asia Pacific"),
    region("sa-east-1", "Sao Paulo", "Other"),
    region("ca-central-1", "Canada", "Other"),
    region("me-south-1", "Bahrain", "Other"),
    region("af-south-1", "Cape Town", "Other"),
];

/// Accepts listed regions plus anything shaped like `xx-name-N`.
pub fn is_region_code(code: &str) -> bool {
    if REGIONS.iter().any(|region| region.code == code) {
        return true;
    }
    let parts = code.split('-').collect::<Vec<_>>();
    parts.len() >= 3
        && parts[0].len() == 2
        && parts
            .iter()
            .take(parts.len() - 1)
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase()))
        && parts
            .last()
            .is_some_and(|last| !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceSummary {
    pub id: String,
    pub name: String,
}

/// One page of a listing. An absent token means the listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub summaries: Vec<ResourceSummary>,
    pub next_token: Option<String>,
}

impl ResourcePage {
    pub fn has_more(&self) -> bool {
        self.next_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

/// HTTP front for a public endpoint: requests are re-addressed to the
/// upstream host and prefixed with `base_path`.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct HttpRoute {
    pub tls: bool,
    pub base_path: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Exposure {
    /// Raw TCP straight to the host.
    Public,
    /// Local reverse proxy in front of an HTTP(S) host.
    Http(HttpRoute),
    /// Reachable only from inside a network, through a jump host.
    Private { network_id: Option<String> },
    /// A container port reached through its task's session agent.
    Container { ssm_target: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub exposure: Exposure,
}

impl Endpoint {
    pub fn is_private(&self) -> bool {
        matches!(self.exposure, Exposure::Private { .. })
    }

    pub fn access_label(&self) -> &'static str {
        match self.exposure {
            Exposure::Public => "public",
            Exposure::Http(_) => "public http",
            Exposure::Private { .. } => "private",
            Exposure::Container { .. } => "container",
        }
    }
}

/// A CloudWatch log group, optionally narrowed to one stream.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct LogSource {
    pub group: String,
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceDetail {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub endpoints: Vec<Endpoint>,
    pub logs: Option<LogSource>,
}

impl ResourceDetail {
    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();
        if self.name.to_ascii_lowercase().contains(&query_lower)
            || self.id.to_ascii_lowercase().contains(&query_lower)
        {
            return true;
        }

        self.columns
            .iter()
            .any(|column| column.to_ascii_lowercase().contains(&query_lower))
    }

    /// Endpoint picked by name or port, or the first one when no selector is given.
    pub fn endpoint(&self, selector: Option<&str>) -> Option<&Endpoint> {
        let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.endpoints.first();
        };
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.name.eq_ignore_ascii_case(selector))
            .or_else(|| {
                self.endpoints
                    .iter()
                    .find(|endpoint| endpoint.port.to_string() == selector)
            })
    }

    pub fn detail_text(&self) -> String {
        let mut lines = vec![format!("name: {}", self.name), format!("id: {}", self.id)];
        for (key, value) in &self.attributes {
            lines.push(format!("{key}: {value}"));
        }
        for endpoint in &self.endpoints {
            lines.push(format!(
                "endpoint {}: {}:{} ({})",
                endpoint.name,
                endpoint.host,
                endpoint.port,
                endpoint.access_label()
            ));
        }
        if let Some(logs) = &self.logs {
            match &logs.stream {
                Some(stream) => lines.push(format!("logs: {} {stream}", logs.group)),
                None => lines.push(format!("logs: {}", logs.group)),
            }
        }
        lines.join("\n")
    }
}

/// Name used to order items inside a batch.
pub trait DisplayName {
    fn display_name(&self) -> &str;
}

impl DisplayName for ResourceDetail {
    fn display_name(&self) -> &str {
        &self.name
    }
}

/// One incremental delivery of a paginated load.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub is_append: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub rows: Vec<ResourceDetail>,
    pub selected: usize,
    pub loading: bool,
    pub has_more: bool,
    pub generation: u64,
    pub last_refreshed: Option<DateTime<Local>>,
    pub error: Option<String>,
}

impl TableData {
    pub fn begin_load(&mut self, generation: u64) {
        self.generation = generation;
        self.loading = true;
        self.error = None;
    }

    pub fn apply_batch(&mut self, batch: Batch<ResourceDetail>, refreshed_at: DateTime<Local>) {
        if batch.is_append {
            self.rows.extend(batch.items);
        } else {
            self.rows = batch.items;
        }
        self.has_more = batch.has_more;
        self.loading = batch.has_more;
        self.last_refreshed = Some(refreshed_at);
        self.error = None;
        self.selected = self.selected.min(self.rows.len().saturating_sub(1));
    }

    pub fn finish_load(&mut self) {
        self.loading = false;
        self.has_more = false;
    }

    pub fn set_error(&mut self, error: impl Into<String>, refreshed_at: DateTime<Local>) {
        self.rows.clear();
        self.error = Some(error.into());
        self.loading = false;
        self.has_more = false;
        self.last_refreshed = Some(refreshed_at);
        self.selected = 0;
    }
}
