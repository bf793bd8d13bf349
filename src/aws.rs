//! `aws` CLI backed implementation of the resource and tunnel capabilities.
//!
//! Every call shells out with `--output json`. Listings page with
//! `--max-items` and `--starting-token`; the CLI reports the continuation as a
//! top-level `NextToken`. The region can be switched at runtime and applies to
//! every call made after the switch.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Local, TimeZone};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command as TokioCommand;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::actions::{Invocation, ItemFilter, ItemPage, ItemQuery, LogBatch, LogEvent};
use crate::jump_host::JumpHostCandidate;
use crate::model::{
    Endpoint, Exposure, HttpRoute, LogSource, ResourceDetail, ResourceKind, ResourcePage,
    ResourceSummary, short_id,
};
use crate::service::{ResourceActions, ResourceService, TunnelBackend};
use crate::tunnel::http_proxy::HttpProxySession;
use crate::tunnel::session::{
    DirectSession, LOCAL_BIND_HOST, SessionRoute, SessionSignal, SessionStream, TunnelSession,
};

const SSM_REMOTE_HOST_DOCUMENT: &str = "AWS-StartPortForwardingSessionToRemoteHost";
const SSM_PORT_DOCUMENT: &str = "AWS-StartPortForwardingSession";
const SSM_READY_ATTEMPTS: usize = 25;
const SSM_READY_INTERVAL: Duration = Duration::from_millis(200);
const SSM_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

static INVOKE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
pub struct AwsCli {
    profile: Option<String>,
    region: RwLock<Option<String>>,
}

impl AwsCli {
    pub fn new(profile: Option<String>, region: Option<String>) -> Self {
        Self {
            profile: profile.filter(|value| !value.trim().is_empty()),
            region: RwLock::new(region.filter(|value| !value.trim().is_empty())),
        }
    }

    pub fn profile_label(&self) -> &str {
        self.profile.as_deref().unwrap_or("default")
    }

    pub fn region_label(&self) -> String {
        self.region().unwrap_or_else(|| "default".to_string())
    }

    pub fn set_region(&self, region: &str) {
        let region = region.trim();
        info!("switching region to {region}");
        *self.region.write().unwrap_or_else(PoisonError::into_inner) =
            (!region.is_empty()).then(|| region.to_string());
    }

    fn region(&self) -> Option<String> {
        self.region
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cli_args(&self, service: &str, operation: &str, extra: &[String]) -> Vec<String> {
        let mut args = vec![service.to_string(), operation.to_string()];
        args.extend(extra.iter().cloned());
        args.push("--output".to_string());
        args.push("json".to_string());
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        if let Some(region) = self.region() {
            args.push("--region".to_string());
            args.push(region);
        }
        args
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        extra: &[String],
    ) -> Result<T> {
        let args = self.cli_args(service, operation, extra);
        debug!("aws {}", args.join(" "));
        let output = TokioCommand::new("aws")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to execute aws {service} {operation}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "aws {service} {operation} exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_str("{}")
                .with_context(|| format!("aws {service} {operation} returned no output"));
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("failed to parse aws {service} {operation} output"))
    }

    fn paging_args(token: Option<&str>, page_size: usize) -> Vec<String> {
        let mut args = vec!["--max-items".to_string(), page_size.max(1).to_string()];
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            args.push("--starting-token".to_string());
            args.push(token.to_string());
        }
        args
    }

    fn api_region(&self) -> String {
        self.region().unwrap_or_else(|| "us-east-1".to_string())
    }

    async fn rest_api(&self, api_id: &str) -> Result<RestApi> {
        self.run_json(
            "apigateway",
            "get-rest-api",
            &["--rest-api-id".to_string(), api_id.to_string()],
        )
        .await
    }

    /// Partition key name and its attribute type.
    async fn partition_key(&self, table: &str) -> Result<(String, String)> {
        let described: DescribeTable = self
            .run_json(
                "dynamodb",
                "describe-table",
                &["--table-name".to_string(), table.to_string()],
            )
            .await?;
        described
            .table
            .partition_key()
            .ok_or_else(|| anyhow!("table {table} has no partition key"))
    }
}

fn flag(name: &str, value: impl Into<String>) -> [String; 2] {
    [name.to_string(), value.into()]
}

impl ResourceService for AwsCli {
    type Detail = ResourceDetail;

    async fn list_page(
        &self,
        kind: ResourceKind,
        parent: Option<&str>,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<ResourcePage> {
        let paging = Self::paging_args(token, page_size);
        let require_parent =
            || parent.ok_or_else(|| anyhow!("{} are listed per parent", kind.title()));
        match kind {
            ResourceKind::Stacks => {
                let listed: ListStacks = self
                    .run_json("cloudformation", "list-stacks", &paging)
                    .await?;
                Ok(listed.into_page())
            }
            ResourceKind::Queues => {
                let listed: ListQueues = self.run_json("sqs", "list-queues", &paging).await?;
                Ok(listed.into_page())
            }
            ResourceKind::Functions => {
                let listed: ListFunctions =
                    self.run_json("lambda", "list-functions", &paging).await?;
                Ok(listed.into_page())
            }
            ResourceKind::Clusters => {
                let listed: ListClusters = self.run_json("ecs", "list-clusters", &paging).await?;
                Ok(listed.into_page())
            }
            ResourceKind::Services => {
                let mut args = flag("--cluster", require_parent()?).to_vec();
                args.extend(paging);
                let listed: ListServices = self.run_json("ecs", "list-services", &args).await?;
                Ok(listed.into_page())
            }
            ResourceKind::Tasks => {
                let service = require_parent()?;
                let cluster = arn_cluster(service)
                    .ok_or_else(|| anyhow!("service {service} does not name its cluster"))?;
                let mut args = flag("--cluster", cluster).to_vec();
                args.extend(flag("--service-name", short_id(service)));
                args.extend(paging);
                let listed: ListTasks = self.run_json("ecs", "list-tasks", &args).await?;
                Ok(listed.into_page())
            }
            ResourceKind::Apis => {
                let listed: ListRestApis = self
                    .run_json("apigateway", "get-rest-apis", &paging)
                    .await?;
                Ok(listed.into_page())
            }
            ResourceKind::Stages => {
                let api_id = require_parent()?;
                let listed: ListStages = self
                    .run_json("apigateway", "get-stages", &flag("--rest-api-id", api_id))
                    .await?;
                Ok(listed.into_page(api_id))
            }
            ResourceKind::Tables => {
                let listed: ListTables = self.run_json("dynamodb", "list-tables", &paging).await?;
                Ok(listed.into_page())
            }
        }
    }

    async fn describe_one(&self, kind: ResourceKind, id: &str) -> Result<ResourceDetail> {
        let id_arg = |flag: &str| vec![flag.to_string(), id.to_string()];
        match kind {
            ResourceKind::Stacks => {
                let described: DescribeStacks = self
                    .run_json("cloudformation", "describe-stacks", &id_arg("--stack-name"))
                    .await?;
                let stack = described
                    .stacks
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("stack {id} not found"))?;
                Ok(stack_detail(stack))
            }
            ResourceKind::Queues => {
                let mut args = id_arg("--queue-url");
                args.extend(["--attribute-names".to_string(), "All".to_string()]);
                let described: QueueAttributes =
                    self.run_json("sqs", "get-queue-attributes", &args).await?;
                Ok(queue_detail(id, described.attributes))
            }
            ResourceKind::Functions => {
                let described: GetFunction = self
                    .run_json("lambda", "get-function", &id_arg("--function-name"))
                    .await?;
                Ok(function_detail(described.configuration))
            }
            ResourceKind::Clusters => {
                let described: DescribeClusters = self
                    .run_json("ecs", "describe-clusters", &id_arg("--clusters"))
                    .await?;
                let cluster = described
                    .clusters
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("cluster {id} not found"))?;
                Ok(cluster_detail(cluster))
            }
            ResourceKind::Services => {
                let cluster =
                    arn_cluster(id).ok_or_else(|| anyhow!("service {id} does not name its cluster"))?;
                let mut args = flag("--cluster", cluster).to_vec();
                args.extend(id_arg("--services"));
                let described: DescribeServices =
                    self.run_json("ecs", "describe-services", &args).await?;
                let service = described
                    .services
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("service {id} not found"))?;
                Ok(service_detail(service))
            }
            ResourceKind::Tasks => {
                let cluster =
                    arn_cluster(id).ok_or_else(|| anyhow!("task {id} does not name its cluster"))?;
                let mut args = flag("--cluster", cluster).to_vec();
                args.extend(id_arg("--tasks"));
                let described: DescribeTasks = self.run_json("ecs", "describe-tasks", &args).await?;
                let task = described
                    .tasks
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("task {id} not found"))?;
                let definition: DescribeTaskDefinition = self
                    .run_json(
                        "ecs",
                        "describe-task-definition",
                        &flag("--task-definition", task.task_definition_arn.clone()),
                    )
                    .await
                    .with_context(|| format!("failed to read task definition for {}", short_id(id)))?;
                Ok(task_detail(task, definition.task_definition, cluster))
            }
            ResourceKind::Apis => {
                let api = self.rest_api(id).await?;
                Ok(api_detail(api, &self.api_region()))
            }
            ResourceKind::Stages => {
                let (api_id, stage_name) = id
                    .split_once('/')
                    .ok_or_else(|| anyhow!("stage id {id} is not api/stage"))?;
                let api = self.rest_api(api_id).await?;
                let mut args = flag("--rest-api-id", api_id).to_vec();
                args.extend(flag("--stage-name", stage_name));
                let stage: ApiStage = self.run_json("apigateway", "get-stage", &args).await?;
                Ok(stage_detail(&api, stage, &self.api_region()))
            }
            ResourceKind::Tables => {
                let described: DescribeTable = self
                    .run_json("dynamodb", "describe-table", &id_arg("--table-name"))
                    .await?;
                Ok(table_detail(described.table))
            }
        }
    }

    async fn scope_members(&self, kind: ResourceKind, stack: &str) -> Result<Vec<String>> {
        let Some(resource_type) = kind.stack_resource_type() else {
            if kind == ResourceKind::Stacks {
                return Ok(vec![stack.to_string()]);
            }
            bail!("{} cannot be scoped to a stack", kind.title());
        };
        let listed: ListStackResources = self
            .run_json(
                "cloudformation",
                "list-stack-resources",
                &["--stack-name".to_string(), stack.to_string()],
            )
            .await?;
        Ok(stack_members(listed.stack_resource_summaries, resource_type))
    }
}

impl TunnelBackend for AwsCli {
    async fn list_jump_hosts(&self) -> Result<Vec<JumpHostCandidate>> {
        let instances: DescribeInstances = self
            .run_json(
                "ec2",
                "describe-instances",
                &[
                    "--filters".to_string(),
                    "Name=instance-state-name,Values=running".to_string(),
                ],
            )
            .await?;
        let managed: InstanceInformation = self
            .run_json("ssm", "describe-instance-information", &[])
            .await
            .context("failed to list session manager instances")?;
        Ok(jump_host_candidates(
            instances.reservations,
            managed.instance_information_list,
        ))
    }

    async fn find_private_endpoint(&self, network_id: &str) -> Result<Option<String>> {
        let endpoints: DescribeVpcEndpoints = self
            .run_json(
                "ec2",
                "describe-vpc-endpoints",
                &[
                    "--filters".to_string(),
                    format!("Name=vpc-id,Values={network_id}"),
                ],
            )
            .await?;
        Ok(execute_api_endpoint(endpoints.vpc_endpoints))
    }

    async fn open_session(&self, route: &SessionRoute) -> Result<Box<dyn TunnelSession>> {
        let target = &route.target;
        match (&route.jump_host, &target.exposure) {
            (Some(jump_host), _) => {
                let forward = SsmForward {
                    target: jump_host.instance_id.clone(),
                    remote_host: Some(remote_host_for(route)),
                    remote_port: target.port,
                };
                Ok(Box::new(SsmSession::start(self, forward).await?))
            }
            (None, Exposure::Container { ssm_target }) => {
                let forward = SsmForward {
                    target: ssm_target.clone(),
                    remote_host: None,
                    remote_port: target.port,
                };
                Ok(Box::new(SsmSession::start(self, forward).await?))
            }
            (None, Exposure::Http(route)) => Ok(Box::new(HttpProxySession::new(
                target.host.clone(),
                target.port,
                route.clone(),
            ))),
            (None, _) => Ok(Box::new(DirectSession::new(target.host.clone(), target.port))),
        }
    }
}

impl ResourceActions for AwsCli {
    async fn invoke_function(&self, function: &str, payload: Option<&str>) -> Result<Invocation> {
        let outfile = std::env::temp_dir().join(format!(
            "vaws-invoke-{}-{}.json",
            std::process::id(),
            INVOKE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let mut args = flag("--function-name", function).to_vec();
        args.extend(flag("--log-type", "Tail"));
        if let Some(payload) = payload.map(str::trim).filter(|p| !p.is_empty()) {
            serde_json::from_str::<Value>(payload).context("payload is not valid JSON")?;
            args.extend(flag("--payload", payload));
            args.extend(flag("--cli-binary-format", "raw-in-base64-out"));
        }
        args.push(outfile.display().to_string());

        let started = Instant::now();
        let invoked = self.run_json::<InvokeOutput>("lambda", "invoke", &args).await;
        let duration = started.elapsed();
        let body = tokio::fs::read_to_string(&outfile).await;
        let _ = tokio::fs::remove_file(&outfile).await;
        let invoked = invoked?;
        Ok(Invocation {
            function: function.to_string(),
            status_code: invoked.status_code,
            executed_version: invoked.executed_version,
            function_error: invoked.function_error,
            payload: body.unwrap_or_default(),
            log_tail: invoked.log_result.as_deref().and_then(decode_log_tail),
            duration,
        })
    }

    async fn fetch_logs(&self, source: &LogSource, since_ms: i64, limit: usize) -> Result<LogBatch> {
        let mut args = flag("--log-group-name", source.group.clone()).to_vec();
        if let Some(stream) = &source.stream {
            args.extend(flag("--log-stream-names", stream.clone()));
        }
        args.extend(flag("--start-time", (since_ms + 1).to_string()));
        args.extend(flag("--max-items", limit.max(1).to_string()));
        let filtered: FilterLogEvents = self
            .run_json("logs", "filter-log-events", &args)
            .await
            .with_context(|| format!("failed to read {}", source.group))?;
        Ok(filtered.into_batch())
    }

    async fn query_items(&self, query: &ItemQuery) -> Result<ItemPage> {
        let mut args = flag("--table-name", query.table.clone()).to_vec();
        let operation = match &query.filter {
            ItemFilter::Scan => "scan",
            ItemFilter::KeyEquals { key, value } => {
                let (partition, key_type) = self.partition_key(&query.table).await?;
                let attribute = key.clone().unwrap_or_else(|| partition.clone());
                let on_key = attribute == partition;
                args.extend(key_condition_args(&attribute, &key_type, value, on_key));
                if on_key { "query" } else { "scan" }
            }
        };
        args.extend(Self::paging_args(query.next_token.as_deref(), query.limit));
        let page: ItemsOutput = self
            .run_json("dynamodb", operation, &args)
            .await
            .with_context(|| format!("failed to {}", query.describe()))?;
        Ok(ItemPage {
            items: page.items,
            next_token: page.next_token,
        })
    }
}

/// Condition arguments for an equality match. Non-key attributes are matched
/// with a scan filter.
fn key_condition_args(attribute: &str, key_type: &str, value: &str, on_key: bool) -> Vec<String> {
    let typed = match key_type {
        "N" => json!({ ":v": { "N": value } }),
        "B" => json!({ ":v": { "B": value } }),
        _ => json!({ ":v": { "S": value } }),
    };
    let condition = if on_key {
        "--key-condition-expression"
    } else {
        "--filter-expression"
    };
    vec![
        condition.to_string(),
        "#k = :v".to_string(),
        "--expression-attribute-names".to_string(),
        json!({ "#k": attribute }).to_string(),
        "--expression-attribute-values".to_string(),
        typed.to_string(),
    ]
}

fn decode_log_tail(encoded: &str) -> Option<String> {
    BASE64
        .decode(encoded.trim())
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InvokeOutput {
    status_code: i64,
    function_error: Option<String>,
    log_result: Option<String>,
    executed_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FilterLogEvents {
    events: Vec<FilteredEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FilteredEvent {
    timestamp: i64,
    message: String,
    log_stream_name: Option<String>,
}

impl FilterLogEvents {
    fn into_batch(self) -> LogBatch {
        let mut events = self
            .events
            .into_iter()
            .map(|event| LogEvent {
                timestamp_ms: event.timestamp,
                stream: event.log_stream_name,
                message: event.message,
            })
            .collect::<Vec<_>>();
        events.sort_by_key(|event| event.timestamp_ms);
        LogBatch { events }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemsOutput {
    items: Vec<Value>,
    next_token: Option<String>,
}

/// What a Session Manager forward connects to. Without a remote host the
/// port is opened on the target itself.
#[derive(Debug, Clone, Eq, PartialEq)]
struct SsmForward {
    target: String,
    remote_host: Option<String>,
    remote_port: u16,
}

impl SsmForward {
    fn document(&self) -> &'static str {
        if self.remote_host.is_some() {
            SSM_REMOTE_HOST_DOCUMENT
        } else {
            SSM_PORT_DOCUMENT
        }
    }

    fn parameters(&self, relay_port: u16) -> String {
        match &self.remote_host {
            Some(host) => format!(
                "host={host},portNumber={},localPortNumber={relay_port}",
                self.remote_port
            ),
            None => format!(
                "portNumber={},localPortNumber={relay_port}",
                self.remote_port
            ),
        }
    }

    fn describe(&self) -> String {
        match &self.remote_host {
            Some(host) => format!("via {} to {host}:{}", self.target, self.remote_port),
            None => format!("to port {} on {}", self.remote_port, self.target),
        }
    }
}

/// Port-forwarding session through Session Manager. A local relay port is
/// owned by the `aws ssm start-session` child.
struct SsmSession {
    relay_port: u16,
    signal: Arc<SessionSignal>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl SsmSession {
    async fn start(cli: &AwsCli, forward: SsmForward) -> Result<Self> {
        let relay_port = find_available_port().await?;
        let args = cli.cli_args(
            "ssm",
            "start-session",
            &[
                "--target".to_string(),
                forward.target.clone(),
                "--document-name".to_string(),
                forward.document().to_string(),
                "--parameters".to_string(),
                forward.parameters(relay_port),
            ],
        );
        info!("starting session manager forward {}", forward.describe());

        let mut child = TokioCommand::new("aws")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn aws ssm start-session")?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("AccessDenied") || line.contains("TargetNotConnected") {
                        error!("session manager: {line}");
                    } else {
                        debug!("session manager: {line}");
                    }
                }
            });
        }

        let mut ready = false;
        for _ in 0..SSM_READY_ATTEMPTS {
            if let Some(status) = child.try_wait().context("failed to poll session process")? {
                bail!("aws ssm start-session exited early with {status}");
            }
            if TcpStream::connect((LOCAL_BIND_HOST, relay_port)).await.is_ok() {
                ready = true;
                break;
            }
            sleep(SSM_READY_INTERVAL).await;
        }
        if !ready {
            let _ = child.kill().await;
            bail!("session manager relay port {relay_port} never started listening");
        }

        let signal = Arc::new(SessionSignal::new());
        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor_signal = Arc::clone(&signal);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!("session manager process exited with {status}"),
                    Err(error) => warn!("session manager process wait failed: {error}"),
                },
                _ = kill_rx => {
                    if let Err(error) = child.kill().await {
                        warn!("failed to kill session manager process: {error}");
                    }
                }
            }
            supervisor_signal.mark_closed();
        });

        Ok(Self {
            relay_port,
            signal,
            kill: Mutex::new(Some(kill_tx)),
        })
    }
}

impl TunnelSession for SsmSession {
    fn connect(&self) -> BoxFuture<'_, io::Result<SessionStream>> {
        Box::pin(async move {
            if self.signal.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "session manager process has exited",
                ));
            }
            let stream = TcpStream::connect((LOCAL_BIND_HOST, self.relay_port)).await?;
            Ok(Box::new(stream) as SessionStream)
        })
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        self.signal.wait()
    }

    fn terminate(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let kill = self
                .kill
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            timeout(SSM_TERMINATE_TIMEOUT, self.signal.wait())
                .await
                .map_err(|_| anyhow!("session manager process did not exit in time"))
        })
    }
}

async fn find_available_port() -> Result<u16> {
    let listener = TcpListener::bind((LOCAL_BIND_HOST, 0))
        .await
        .context("failed to find available port")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Host the jump host should forward to. Private gateways are addressed through
/// their interface endpoint as `{api-id}-{vpce-id}.execute-api...`.
fn remote_host_for(route: &SessionRoute) -> String {
    let host = route.target.host.as_str();
    match route.private_endpoint.as_deref() {
        Some(endpoint) if endpoint.contains('.') => endpoint.to_string(),
        Some(endpoint) if endpoint.starts_with("vpce-") => match host.split_once('.') {
            Some((api_id, rest)) if rest.starts_with("execute-api.") => {
                format!("{api_id}-{endpoint}.{rest}")
            }
            _ => host.to_string(),
        },
        _ => host.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListStacks {
    stack_summaries: Vec<StackSummary>,
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct StackSummary {
    stack_name: String,
    stack_status: String,
}

impl ListStacks {
    fn into_page(self) -> ResourcePage {
        let summaries = self
            .stack_summaries
            .into_iter()
            .filter(|stack| stack.stack_status != "DELETE_COMPLETE")
            .map(|stack| ResourceSummary {
                id: stack.stack_name.clone(),
                name: stack.stack_name,
            })
            .collect();
        ResourcePage {
            summaries,
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeStacks {
    stacks: Vec<Stack>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Stack {
    stack_name: String,
    stack_id: String,
    stack_status: String,
    creation_time: Option<String>,
    last_updated_time: Option<String>,
    description: Option<String>,
}

fn stack_detail(stack: Stack) -> ResourceDetail {
    let updated = stack
        .last_updated_time
        .as_deref()
        .or(stack.creation_time.as_deref())
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string());
    let mut attributes = BTreeMap::new();
    attributes.insert("status".to_string(), stack.stack_status.clone());
    attributes.insert("stack id".to_string(), stack.stack_id);
    if let Some(description) = stack.description.filter(|d| !d.is_empty()) {
        attributes.insert("description".to_string(), description);
    }
    ResourceDetail {
        id: stack.stack_name.clone(),
        columns: vec![stack.stack_name.clone(), stack.stack_status, updated],
        name: stack.stack_name,
        attributes,
        ..ResourceDetail::default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListQueues {
    queue_urls: Vec<String>,
    next_token: Option<String>,
}

impl ListQueues {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .queue_urls
                .into_iter()
                .map(|url| ResourceSummary {
                    name: queue_name_from_url(&url).to_string(),
                    id: url,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct QueueAttributes {
    attributes: HashMap<String, String>,
}

fn queue_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

fn queue_detail(url: &str, attributes: HashMap<String, String>) -> ResourceDetail {
    let name = queue_name_from_url(url).to_string();
    let attr = |key: &str| {
        attributes
            .get(key)
            .cloned()
            .unwrap_or_else(|| "-".to_string())
    };
    let fifo = name.ends_with(".fifo")
        || attributes
            .get("FifoQueue")
            .is_some_and(|value| value == "true");
    let queue_type = if fifo {
        "FIFO"
    } else {
        "Standard"
    };
    let dead_letter = attributes
        .get("RedrivePolicy")
        .filter(|policy| !policy.is_empty())
        .and_then(|policy| serde_json::from_str::<Value>(policy).ok())
        .and_then(|policy| {
            policy
                .get("deadLetterTargetArn")
                .and_then(Value::as_str)
                .map(|arn| arn.rsplit(':').next().unwrap_or(arn).to_string())
        });

    let mut details = BTreeMap::new();
    details.insert("url".to_string(), url.to_string());
    for (key, label) in [
        ("QueueArn", "arn"),
        ("VisibilityTimeout", "visibility timeout"),
        ("MessageRetentionPeriod", "retention"),
        ("DelaySeconds", "delay"),
    ] {
        if let Some(value) = attributes.get(key) {
            details.insert(label.to_string(), value.clone());
        }
    }
    if let Some(dlq) = &dead_letter {
        details.insert("dead letter queue".to_string(), dlq.clone());
    }

    ResourceDetail {
        id: url.to_string(),
        columns: vec![
            name.clone(),
            queue_type.to_string(),
            attr("ApproximateNumberOfMessages"),
            attr("ApproximateNumberOfMessagesNotVisible"),
            dead_letter.unwrap_or_else(|| "-".to_string()),
        ],
        name,
        attributes: details,
        ..ResourceDetail::default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListFunctions {
    functions: Vec<FunctionConfiguration>,
    next_token: Option<String>,
}

impl ListFunctions {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .functions
                .into_iter()
                .map(|function| ResourceSummary {
                    id: function.function_name.clone(),
                    name: function.function_name,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GetFunction {
    configuration: FunctionConfiguration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FunctionConfiguration {
    function_name: String,
    function_arn: String,
    runtime: Option<String>,
    handler: Option<String>,
    memory_size: Option<u64>,
    timeout: Option<u64>,
    state: Option<String>,
    last_modified: Option<String>,
    description: Option<String>,
}

fn function_detail(function: FunctionConfiguration) -> ResourceDetail {
    let mut attributes = BTreeMap::new();
    attributes.insert("arn".to_string(), function.function_arn);
    if let Some(handler) = function.handler {
        attributes.insert("handler".to_string(), handler);
    }
    if let Some(modified) = function.last_modified {
        attributes.insert("last modified".to_string(), modified);
    }
    if let Some(description) = function.description.filter(|d| !d.is_empty()) {
        attributes.insert("description".to_string(), description);
    }
    ResourceDetail {
        id: function.function_name.clone(),
        logs: Some(LogSource {
            group: format!("/aws/lambda/{}", function.function_name),
            stream: None,
        }),
        columns: vec![
            function.function_name.clone(),
            function.runtime.unwrap_or_else(|| "image".to_string()),
            function
                .memory_size
                .map(|mb| format!("{mb}MB"))
                .unwrap_or_else(|| "-".to_string()),
            function
                .timeout
                .map(|secs| format!("{secs}s"))
                .unwrap_or_else(|| "-".to_string()),
            function.state.unwrap_or_else(|| "-".to_string()),
        ],
        name: function.function_name,
        attributes,
        endpoints: Vec::new(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListClusters {
    cluster_arns: Vec<String>,
    #[serde(alias = "NextToken")]
    next_token: Option<String>,
}

impl ListClusters {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .cluster_arns
                .into_iter()
                .map(|arn| ResourceSummary {
                    name: arn.rsplit('/').next().unwrap_or(&arn).to_string(),
                    id: arn,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescribeClusters {
    clusters: Vec<Cluster>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Cluster {
    cluster_arn: String,
    cluster_name: String,
    status: String,
    active_services_count: u64,
    running_tasks_count: u64,
    pending_tasks_count: u64,
}

fn cluster_detail(cluster: Cluster) -> ResourceDetail {
    let mut attributes = BTreeMap::new();
    attributes.insert("arn".to_string(), cluster.cluster_arn.clone());
    attributes.insert(
        "pending tasks".to_string(),
        cluster.pending_tasks_count.to_string(),
    );
    ResourceDetail {
        id: cluster.cluster_arn,
        columns: vec![
            cluster.cluster_name.clone(),
            cluster.status,
            cluster.active_services_count.to_string(),
            cluster.running_tasks_count.to_string(),
        ],
        name: cluster.cluster_name,
        attributes,
        ..ResourceDetail::default()
    }
}

/// Cluster name embedded in a `service/{cluster}/{name}` or `task/{cluster}/{id}` ARN.
fn arn_cluster(arn: &str) -> Option<&str> {
    let resource = arn.rsplit(':').next()?;
    let mut parts = resource.split('/');
    let (_, cluster, _) = (parts.next()?, parts.next()?, parts.next()?);
    (parts.next().is_none() && !cluster.is_empty()).then_some(cluster)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListServices {
    service_arns: Vec<String>,
    #[serde(alias = "NextToken")]
    next_token: Option<String>,
}

impl ListServices {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .service_arns
                .into_iter()
                .map(|arn| ResourceSummary {
                    name: short_id(&arn).to_string(),
                    id: arn,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescribeServices {
    services: Vec<EcsService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EcsService {
    service_arn: String,
    service_name: String,
    status: String,
    desired_count: u64,
    running_count: u64,
    pending_count: u64,
    launch_type: Option<String>,
    task_definition: String,
    enable_execute_command: bool,
    created_at: Option<Value>,
}

fn service_detail(service: EcsService) -> ResourceDetail {
    let mut attributes = BTreeMap::new();
    attributes.insert("arn".to_string(), service.service_arn.clone());
    attributes.insert(
        "task definition".to_string(),
        short_id(&service.task_definition).to_string(),
    );
    attributes.insert("pending".to_string(), service.pending_count.to_string());
    attributes.insert(
        "execute command".to_string(),
        enabled(service.enable_execute_command).to_string(),
    );
    if let Some(created) = &service.created_at {
        attributes.insert("created".to_string(), format_time_value(created));
    }
    ResourceDetail {
        id: service.service_arn,
        columns: vec![
            service.service_name.clone(),
            service.status,
            service.desired_count.to_string(),
            service.running_count.to_string(),
            service.launch_type.unwrap_or_else(|| "-".to_string()),
        ],
        name: service.service_name,
        attributes,
        ..ResourceDetail::default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListTasks {
    task_arns: Vec<String>,
    #[serde(alias = "NextToken")]
    next_token: Option<String>,
}

impl ListTasks {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .task_arns
                .into_iter()
                .map(|arn| ResourceSummary {
                    name: short_id(&arn).to_string(),
                    id: arn,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescribeTasks {
    tasks: Vec<EcsTask>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EcsTask {
    task_arn: String,
    last_status: String,
    desired_status: String,
    task_definition_arn: String,
    launch_type: Option<String>,
    enable_execute_command: bool,
    started_at: Option<Value>,
    containers: Vec<EcsContainer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EcsContainer {
    name: String,
    runtime_id: Option<String>,
    last_status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescribeTaskDefinition {
    task_definition: TaskDefinition,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TaskDefinition {
    container_definitions: Vec<ContainerDefinition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContainerDefinition {
    name: String,
    port_mappings: Vec<PortMapping>,
    log_configuration: Option<LogConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PortMapping {
    container_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogConfiguration {
    log_driver: String,
    options: HashMap<String, String>,
}

/// One endpoint per mapped container port. Ports are only reachable when the
/// task runs with execute command enabled.
fn task_detail(task: EcsTask, definition: TaskDefinition, cluster: &str) -> ResourceDetail {
    let task_id = short_id(&task.task_arn).to_string();
    let definitions = definition
        .container_definitions
        .iter()
        .map(|container| (container.name.as_str(), container))
        .collect::<HashMap<_, _>>();

    let mut endpoints = Vec::new();
    if task.enable_execute_command {
        for container in &task.containers {
            let (Some(runtime_id), Some(spec)) = (
                container.runtime_id.as_deref(),
                definitions.get(container.name.as_str()),
            ) else {
                continue;
            };
            for port in spec.port_mappings.iter().filter_map(|m| m.container_port) {
                endpoints.push(Endpoint {
                    name: format!("{}:{port}", container.name),
                    host: "localhost".to_string(),
                    port,
                    exposure: Exposure::Container {
                        ssm_target: format!("ecs:{cluster}_{task_id}_{runtime_id}"),
                    },
                });
            }
        }
    }

    let logs = task.containers.iter().find_map(|container| {
        let config = definitions
            .get(container.name.as_str())?
            .log_configuration
            .as_ref()
            .filter(|config| config.log_driver == "awslogs")?;
        let group = config.options.get("awslogs-group")?.clone();
        let stream = config
            .options
            .get("awslogs-stream-prefix")
            .map(|prefix| format!("{prefix}/{}/{task_id}", container.name));
        Some(LogSource { group, stream })
    });

    let ports = endpoints
        .iter()
        .map(|endpoint| endpoint.port.to_string())
        .collect::<Vec<_>>();
    let mut attributes = BTreeMap::new();
    attributes.insert("cluster".to_string(), cluster.to_string());
    attributes.insert(
        "task definition".to_string(),
        short_id(&task.task_definition_arn).to_string(),
    );
    attributes.insert("desired status".to_string(), task.desired_status);
    if let Some(launch) = task.launch_type {
        attributes.insert("launch type".to_string(), launch);
    }
    if let Some(started) = &task.started_at {
        attributes.insert("started".to_string(), format_time_value(started));
    }
    for container in &task.containers {
        attributes.insert(
            format!("container {}", container.name),
            container.last_status.clone(),
        );
    }

    ResourceDetail {
        id: task.task_arn,
        name: task_id.clone(),
        columns: vec![
            task_id,
            task.last_status,
            task.containers.len().to_string(),
            if ports.is_empty() {
                "-".to_string()
            } else {
                ports.join(",")
            },
            enabled(task.enable_execute_command).to_string(),
        ],
        attributes,
        endpoints,
        logs,
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag { "enabled" } else { "disabled" }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListRestApis {
    items: Vec<RestApi>,
    #[serde(rename = "NextToken", alias = "position")]
    next_token: Option<String>,
}

impl ListRestApis {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .items
                .into_iter()
                .map(|api| ResourceSummary {
                    id: api.id,
                    name: api.name,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RestApi {
    id: String,
    name: String,
    description: Option<String>,
    created_date: Option<Value>,
    endpoint_configuration: EndpointConfiguration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EndpointConfiguration {
    types: Vec<String>,
    vpc_endpoint_ids: Vec<String>,
}

impl RestApi {
    fn is_private(&self) -> bool {
        self.endpoint_configuration
            .types
            .iter()
            .any(|kind| kind.eq_ignore_ascii_case("PRIVATE"))
    }

    fn host(&self, region: &str) -> String {
        format!("{}.execute-api.{region}.amazonaws.com", self.id)
    }
}

fn api_detail(api: RestApi, region: &str) -> ResourceDetail {
    let private = api.is_private();
    let host = api.host(region);
    let created = api
        .created_date
        .as_ref()
        .map(format_time_value)
        .unwrap_or_else(|| "-".to_string());

    let mut attributes = BTreeMap::new();
    attributes.insert(
        "endpoint types".to_string(),
        api.endpoint_configuration.types.join(","),
    );
    if !api.endpoint_configuration.vpc_endpoint_ids.is_empty() {
        attributes.insert(
            "vpc endpoints".to_string(),
            api.endpoint_configuration.vpc_endpoint_ids.join(","),
        );
    }
    if let Some(description) = api.description.filter(|d| !d.is_empty()) {
        attributes.insert("description".to_string(), description);
    }

    let exposure = if private {
        Exposure::Private { network_id: None }
    } else {
        Exposure::Http(HttpRoute {
            tls: true,
            base_path: String::new(),
        })
    };

    ResourceDetail {
        columns: vec![
            api.name.clone(),
            api.id.clone(),
            if private { "private" } else { "public" }.to_string(),
            created,
        ],
        id: api.id,
        name: api.name,
        attributes,
        endpoints: vec![Endpoint {
            name: "api".to_string(),
            host,
            port: 443,
            exposure,
        }],
        logs: None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListStages {
    item: Vec<ApiStage>,
}

impl ListStages {
    fn into_page(self, api_id: &str) -> ResourcePage {
        ResourcePage {
            summaries: self
                .item
                .into_iter()
                .map(|stage| ResourceSummary {
                    id: format!("{api_id}/{}", stage.stage_name),
                    name: stage.stage_name,
                })
                .collect(),
            next_token: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiStage {
    stage_name: String,
    deployment_id: Option<String>,
    description: Option<String>,
    created_date: Option<Value>,
    last_updated_date: Option<Value>,
}

/// Public stages are served through the local HTTP front with the stage as
/// base path. Private stages go through a jump host like their API.
fn stage_detail(api: &RestApi, stage: ApiStage, region: &str) -> ResourceDetail {
    let host = api.host(region);
    let private = api.is_private();
    let url = if private {
        "private".to_string()
    } else {
        format!("https://{host}/{}", stage.stage_name)
    };
    let updated = stage
        .last_updated_date
        .as_ref()
        .or(stage.created_date.as_ref())
        .map(format_time_value)
        .unwrap_or_else(|| "-".to_string());
    let exposure = if private {
        Exposure::Private { network_id: None }
    } else {
        Exposure::Http(HttpRoute {
            tls: true,
            base_path: format!("/{}", stage.stage_name),
        })
    };

    let mut attributes = BTreeMap::new();
    attributes.insert("api".to_string(), format!("{} ({})", api.name, api.id));
    if let Some(description) = stage.description.filter(|d| !d.is_empty()) {
        attributes.insert("description".to_string(), description);
    }
    ResourceDetail {
        id: format!("{}/{}", api.id, stage.stage_name),
        columns: vec![
            stage.stage_name.clone(),
            stage.deployment_id.unwrap_or_else(|| "-".to_string()),
            url,
            updated,
        ],
        endpoints: vec![Endpoint {
            name: stage.stage_name.clone(),
            host,
            port: 443,
            exposure,
        }],
        name: stage.stage_name,
        attributes,
        logs: None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListTables {
    table_names: Vec<String>,
    next_token: Option<String>,
}

impl ListTables {
    fn into_page(self) -> ResourcePage {
        ResourcePage {
            summaries: self
                .table_names
                .into_iter()
                .map(|name| ResourceSummary {
                    id: name.clone(),
                    name,
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeTable {
    table: Table,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Table {
    table_name: String,
    table_arn: String,
    table_status: String,
    item_count: u64,
    table_size_bytes: u64,
    billing_mode_summary: Option<BillingModeSummary>,
    key_schema: Vec<KeySchemaElement>,
    attribute_definitions: Vec<AttributeDefinition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct KeySchemaElement {
    attribute_name: String,
    key_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AttributeDefinition {
    attribute_name: String,
    attribute_type: String,
}

impl Table {
    fn key_type(&self, attribute: &str) -> String {
        self.attribute_definitions
            .iter()
            .find(|definition| definition.attribute_name == attribute)
            .map(|definition| definition.attribute_type.clone())
            .unwrap_or_else(|| "S".to_string())
    }

    fn key_named(&self, key_type: &str) -> Option<&str> {
        self.key_schema
            .iter()
            .find(|key| key.key_type == key_type)
            .map(|key| key.attribute_name.as_str())
    }

    fn partition_key(&self) -> Option<(String, String)> {
        let name = self.key_named("HASH")?;
        Some((name.to_string(), self.key_type(name)))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BillingModeSummary {
    billing_mode: String,
}

fn table_detail(table: Table) -> ResourceDetail {
    let billing = table
        .billing_mode_summary
        .as_ref()
        .map(|summary| summary.billing_mode.clone())
        .filter(|mode| !mode.is_empty())
        .unwrap_or_else(|| "PROVISIONED".to_string());
    let mut attributes = BTreeMap::new();
    if let Some((name, key_type)) = table.partition_key() {
        attributes.insert("partition key".to_string(), format!("{name} ({key_type})"));
    }
    if let Some(sort) = table.key_named("RANGE") {
        attributes.insert(
            "sort key".to_string(),
            format!("{sort} ({})", table.key_type(sort)),
        );
    }
    attributes.insert("arn".to_string(), table.table_arn);
    ResourceDetail {
        id: table.table_name.clone(),
        columns: vec![
            table.table_name.clone(),
            table.table_status,
            table.item_count.to_string(),
            human_bytes(table.table_size_bytes),
            billing,
        ],
        name: table.table_name,
        attributes,
        ..ResourceDetail::default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListStackResources {
    stack_resource_summaries: Vec<StackResource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct StackResource {
    physical_resource_id: Option<String>,
    resource_type: String,
}

fn stack_members(resources: Vec<StackResource>, resource_type: &str) -> Vec<String> {
    resources
        .into_iter()
        .filter(|resource| resource.resource_type == resource_type)
        .filter_map(|resource| resource.physical_resource_id)
        .filter(|id| !id.is_empty())
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstances {
    reservations: Vec<Reservation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Reservation {
    instances: Vec<Instance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Instance {
    instance_id: String,
    vpc_id: Option<String>,
    tags: Vec<Tag>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InstanceInformation {
    instance_information_list: Vec<ManagedInstance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ManagedInstance {
    instance_id: String,
    ping_status: String,
}

fn jump_host_candidates(
    reservations: Vec<Reservation>,
    managed: Vec<ManagedInstance>,
) -> Vec<JumpHostCandidate> {
    let online = managed
        .into_iter()
        .filter(|instance| instance.ping_status.eq_ignore_ascii_case("Online"))
        .map(|instance| instance.instance_id)
        .collect::<std::collections::HashSet<_>>();

    let mut candidates = reservations
        .into_iter()
        .flat_map(|reservation| reservation.instances)
        .map(|instance| {
            let tags = instance
                .tags
                .into_iter()
                .map(|tag| (tag.key, tag.value))
                .collect::<BTreeMap<_, _>>();
            JumpHostCandidate {
                name: tags.get("Name").cloned().unwrap_or_default(),
                reachable: online.contains(&instance.instance_id),
                instance_id: instance.instance_id,
                tags,
                network_id: instance.vpc_id,
            }
        })
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    candidates
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeVpcEndpoints {
    vpc_endpoints: Vec<VpcEndpoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VpcEndpoint {
    vpc_endpoint_id: String,
    service_name: String,
    state: String,
}

fn execute_api_endpoint(endpoints: Vec<VpcEndpoint>) -> Option<String> {
    endpoints
        .into_iter()
        .filter(|endpoint| endpoint.service_name.ends_with(".execute-api"))
        .find(|endpoint| endpoint.state.eq_ignore_ascii_case("available"))
        .map(|endpoint| endpoint.vpc_endpoint_id)
}

/// Renders CLI timestamps, which arrive either as epoch seconds or RFC 3339 text.
fn format_time_value(value: &Value) -> String {
    match value {
        Value::Number(epoch) => epoch
            .as_f64()
            .and_then(|secs| Local.timestamp_opt(secs as i64, 0).single())
            .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| epoch.to_string()),
        Value::String(text) => format_timestamp(text),
        other => other.to_string(),
    }
}

fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| {
            time.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1}{unit}")
}

#[cfg(test)]
mod tests {
    use super::{
        ApiStage, AwsCli, DescribeInstances, DescribeServices, DescribeTable, DescribeTasks,
        DescribeTaskDefinition, DescribeVpcEndpoints, FilterLogEvents, GetFunction,
        InstanceInformation, InvokeOutput, ItemsOutput, ListClusters, ListQueues, ListRestApis,
        ListServices, ListStackResources, ListStacks, ListStages, RestApi, SsmForward,
        api_detail, arn_cluster, decode_log_tail, execute_api_endpoint, function_detail,
        human_bytes, jump_host_candidates, key_condition_args, queue_detail, remote_host_for,
        service_detail, stack_members, stage_detail, table_detail, task_detail,
    };
    use crate::actions::unmarshal;
    use crate::jump_host::JumpHostCandidate;
    use crate::model::{Exposure, HttpRoute};
    use crate::tunnel::TunnelTarget;
    use crate::tunnel::session::SessionRoute;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn cli_args_append_output_profile_and_region() {
        let cli = AwsCli::new(Some("prod".to_string()), Some("eu-west-1".to_string()));
        let args = cli.cli_args("sqs", "list-queues", &AwsCli::paging_args(Some("tok"), 25));
        assert_eq!(
            args,
            vec![
                "sqs",
                "list-queues",
                "--max-items",
                "25",
                "--starting-token",
                "tok",
                "--output",
                "json",
                "--profile",
                "prod",
                "--region",
                "eu-west-1"
            ]
        );

        let bare = AwsCli::new(Some(" ".to_string()), None);
        assert_eq!(bare.profile_label(), "default");
        assert_eq!(bare.cli_args("ecs", "list-clusters", &[]).len(), 4);
    }

    #[test]
    fn switching_region_applies_to_later_calls() {
        let cli = AwsCli::new(None, None);
        assert_eq!(cli.region_label(), "default");
        assert_eq!(cli.api_region(), "us-east-1");

        cli.set_region("ap-southeast-2");
        assert_eq!(cli.region_label(), "ap-southeast-2");
        assert_eq!(cli.api_region(), "ap-southeast-2");
        let args = cli.cli_args("ecs", "list-clusters", &[]);
        assert_eq!(&args[args.len() - 2..], ["--region", "ap-southeast-2"]);
    }

    #[test]
    fn stack_listing_skips_deleted_stacks() {
        let listed: ListStacks = serde_json::from_str(
            r#"{"StackSummaries":[
                {"StackName":"old","StackStatus":"DELETE_COMPLETE"},
                {"StackName":"orders","StackStatus":"UPDATE_COMPLETE"}
            ],"NextToken":"abc"}"#,
        )
        .unwrap();
        let page = listed.into_page();
        assert_eq!(page.summaries.len(), 1);
        assert_eq!(page.summaries[0].name, "orders");
        assert!(page.has_more());
    }

    #[test]
    fn queue_pages_and_details_parse() {
        let listed: ListQueues = serde_json::from_str(
            r#"{"QueueUrls":["https://sqs.eu-west-1.amazonaws.com/123/jobs.fifo"]}"#,
        )
        .unwrap();
        let page = listed.into_page();
        assert_eq!(page.summaries[0].name, "jobs.fifo");
        assert!(!page.has_more());

        let attributes = HashMap::from([
            ("ApproximateNumberOfMessages".to_string(), "4".to_string()),
            (
                "ApproximateNumberOfMessagesNotVisible".to_string(),
                "1".to_string(),
            ),
            (
                "RedrivePolicy".to_string(),
                r#"{"deadLetterTargetArn":"arn:aws:sqs:eu-west-1:123:jobs-dlq.fifo","maxReceiveCount":5}"#
                    .to_string(),
            ),
        ]);
        let detail = queue_detail(&page.summaries[0].id, attributes);
        assert_eq!(detail.columns, vec!["jobs.fifo", "FIFO", "4", "1", "jobs-dlq.fifo"]);
    }

    #[test]
    fn function_detail_formats_columns() {
        let described: GetFunction = serde_json::from_str(
            r#"{"Configuration":{"FunctionName":"resize","FunctionArn":"arn:fn",
                "Runtime":"python3.12","MemorySize":256,"Timeout":30,"State":"Active"}}"#,
        )
        .unwrap();
        let detail = function_detail(described.configuration);
        assert_eq!(detail.columns, vec!["resize", "python3.12", "256MB", "30s", "Active"]);
        assert_eq!(detail.attributes.get("arn").map(String::as_str), Some("arn:fn"));
        assert_eq!(
            detail.logs.map(|logs| logs.group),
            Some("/aws/lambda/resize".to_string())
        );
    }

    #[test]
    fn cluster_names_come_from_arns() {
        let listed: ListClusters = serde_json::from_str(
            r#"{"clusterArns":["arn:aws:ecs:eu-west-1:123:cluster/payments"],"NextToken":"n1"}"#,
        )
        .unwrap();
        let page = listed.into_page();
        assert_eq!(page.summaries[0].name, "payments");
        assert_eq!(page.next_token.as_deref(), Some("n1"));
    }

    #[test]
    fn private_rest_api_exposes_private_endpoint() {
        let listed: ListRestApis = serde_json::from_str(
            r#"{"items":[{"id":"a1b2","name":"internal"}],"NextToken":"more"}"#,
        )
        .unwrap();
        assert!(listed.into_page().has_more());

        let api: RestApi = serde_json::from_str(
            r#"{"id":"a1b2","name":"internal","createdDate":1700000000,
                "endpointConfiguration":{"types":["PRIVATE"],"vpcEndpointIds":["vpce-1"]}}"#,
        )
        .unwrap();
        let detail = api_detail(api, "eu-west-1");
        let endpoint = detail.endpoint(None).expect("endpoint");
        assert!(endpoint.is_private());
        assert_eq!(endpoint.host, "a1b2.execute-api.eu-west-1.amazonaws.com");
        assert_eq!(endpoint.port, 443);
        assert_eq!(detail.columns[2], "private");
    }

    #[test]
    fn public_stages_are_fronted_over_http_with_their_base_path() {
        let api: RestApi = serde_json::from_str(
            r#"{"id":"a1b2","name":"orders","endpointConfiguration":{"types":["REGIONAL"]}}"#,
        )
        .unwrap();
        let listed: ListStages = serde_json::from_str(
            r#"{"item":[{"stageName":"prod","deploymentId":"d1"},{"stageName":"dev"}]}"#,
        )
        .unwrap();
        let page = listed.into_page("a1b2");
        assert_eq!(page.summaries[0].id, "a1b2/prod");
        assert!(!page.has_more());

        let stage: ApiStage = serde_json::from_str(
            r#"{"stageName":"prod","deploymentId":"d1","lastUpdatedDate":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let detail = stage_detail(&api, stage, "eu-west-1");
        assert_eq!(detail.id, "a1b2/prod");
        assert_eq!(
            detail.columns[2],
            "https://a1b2.execute-api.eu-west-1.amazonaws.com/prod"
        );
        let endpoint = detail.endpoint(None).expect("endpoint");
        assert_eq!(
            endpoint.exposure,
            Exposure::Http(HttpRoute {
                tls: true,
                base_path: "/prod".to_string()
            })
        );
        assert_eq!(
            api_detail(api, "eu-west-1").endpoints[0].access_label(),
            "public http"
        );
    }

    #[test]
    fn cluster_names_are_read_from_service_and_task_arns() {
        assert_eq!(
            arn_cluster("arn:aws:ecs:eu-west-1:123:service/payments/api"),
            Some("payments")
        );
        assert_eq!(
            arn_cluster("arn:aws:ecs:eu-west-1:123:task/payments/0f9e"),
            Some("payments")
        );
        assert_eq!(arn_cluster("arn:aws:ecs:eu-west-1:123:service/api"), None);
    }

    #[test]
    fn services_list_by_arn_and_describe_counts() {
        let listed: ListServices = serde_json::from_str(
            r#"{"serviceArns":["arn:aws:ecs:eu-west-1:123:service/payments/api"],"nextToken":"n2"}"#,
        )
        .unwrap();
        let page = listed.into_page();
        assert_eq!(page.summaries[0].name, "api");
        assert!(page.has_more());

        let described: DescribeServices = serde_json::from_str(
            r#"{"services":[{"serviceArn":"arn:aws:ecs:eu-west-1:123:service/payments/api",
                "serviceName":"api","status":"ACTIVE","desiredCount":3,"runningCount":2,
                "pendingCount":1,"launchType":"FARGATE","enableExecuteCommand":true,
                "taskDefinition":"arn:aws:ecs:eu-west-1:123:task-definition/api:7"}]}"#,
        )
        .unwrap();
        let detail = service_detail(described.services.into_iter().next().unwrap());
        assert_eq!(detail.columns, vec!["api", "ACTIVE", "3", "2", "FARGATE"]);
        assert_eq!(
            detail.attributes.get("task definition").map(String::as_str),
            Some("api:7")
        );
    }

    #[test]
    fn task_ports_become_container_endpoints() {
        let described: DescribeTasks = serde_json::from_str(
            r#"{"tasks":[{"taskArn":"arn:aws:ecs:eu-west-1:123:task/payments/0f9e",
                "lastStatus":"RUNNING","desiredStatus":"RUNNING","enableExecuteCommand":true,
                "taskDefinitionArn":"arn:aws:ecs:eu-west-1:123:task-definition/api:7",
                "containers":[
                    {"name":"web","runtimeId":"0f9e-111","lastStatus":"RUNNING"},
                    {"name":"sidecar","lastStatus":"PENDING"}
                ]}]}"#,
        )
        .unwrap();
        let definition: DescribeTaskDefinition = serde_json::from_str(
            r#"{"taskDefinition":{"containerDefinitions":[
                {"name":"web","portMappings":[{"containerPort":8080},{"containerPort":9000}],
                 "logConfiguration":{"logDriver":"awslogs","options":{
                    "awslogs-group":"/ecs/api","awslogs-stream-prefix":"ecs"}}},
                {"name":"sidecar","portMappings":[{"containerPort":2000}]}
            ]}}"#,
        )
        .unwrap();
        let task = described.tasks.into_iter().next().unwrap();
        let detail = task_detail(task, definition.task_definition, "payments");

        assert_eq!(detail.name, "0f9e");
        assert_eq!(detail.columns, vec!["0f9e", "RUNNING", "2", "8080,9000", "enabled"]);
        let ports = detail.endpoints.iter().map(|e| e.port).collect::<Vec<_>>();
        assert_eq!(ports, vec![8080, 9000]);
        assert_eq!(
            detail.endpoints[0].exposure,
            Exposure::Container {
                ssm_target: "ecs:payments_0f9e_0f9e-111".to_string()
            }
        );
        let logs = detail.logs.expect("awslogs");
        assert_eq!(logs.group, "/ecs/api");
        assert_eq!(logs.stream.as_deref(), Some("ecs/web/0f9e"));
    }

    #[test]
    fn tasks_without_execute_command_expose_no_ports() {
        let described: DescribeTasks = serde_json::from_str(
            r#"{"tasks":[{"taskArn":"arn:aws:ecs:eu-west-1:123:task/payments/0f9e",
                "lastStatus":"RUNNING","containers":[{"name":"web","runtimeId":"r1"}]}]}"#,
        )
        .unwrap();
        let definition: DescribeTaskDefinition = serde_json::from_str(
            r#"{"taskDefinition":{"containerDefinitions":[
                {"name":"web","portMappings":[{"containerPort":8080}]}]}}"#,
        )
        .unwrap();
        let task = described.tasks.into_iter().next().unwrap();
        let detail = task_detail(task, definition.task_definition, "payments");
        assert!(detail.endpoints.is_empty());
        assert_eq!(detail.columns[3], "-");
        assert_eq!(detail.columns[4], "disabled");
    }

    #[test]
    fn session_forwards_pick_document_by_remote_host() {
        let container = SsmForward {
            target: "ecs:payments_0f9e_r1".to_string(),
            remote_host: None,
            remote_port: 8080,
        };
        assert_eq!(container.document(), "AWS-StartPortForwardingSession");
        assert_eq!(
            container.parameters(50000),
            "portNumber=8080,localPortNumber=50000"
        );

        let remote = SsmForward {
            target: "i-0abc".to_string(),
            remote_host: Some("db.internal".to_string()),
            remote_port: 5432,
        };
        assert_eq!(remote.document(), "AWS-StartPortForwardingSessionToRemoteHost");
        assert_eq!(
            remote.parameters(50001),
            "host=db.internal,portNumber=5432,localPortNumber=50001"
        );
    }

    #[test]
    fn invoke_output_decodes_the_log_tail() {
        let output: InvokeOutput = serde_json::from_str(
            r#"{"StatusCode":200,"FunctionError":"Unhandled","ExecutedVersion":"$LATEST",
                "LogResult":"U1RBUlQKRU5ECg=="}"#,
        )
        .unwrap();
        assert_eq!(output.status_code, 200);
        assert_eq!(output.function_error.as_deref(), Some("Unhandled"));
        assert_eq!(
            output.log_result.as_deref().and_then(decode_log_tail).as_deref(),
            Some("START\nEND\n")
        );
        assert!(decode_log_tail("not base64!").is_none());
    }

    #[test]
    fn log_events_are_ordered_oldest_first() {
        let filtered: FilterLogEvents = serde_json::from_str(
            r#"{"events":[
                {"timestamp":2000,"message":"second","logStreamName":"s"},
                {"timestamp":1000,"message":"first","logStreamName":"s"}
            ]}"#,
        )
        .unwrap();
        let batch = filtered.into_batch();
        assert_eq!(batch.events[0].message, "first");
        assert_eq!(batch.last_timestamp(), Some(2000));
    }

    #[test]
    fn item_pages_parse_typed_items() {
        let page: ItemsOutput = serde_json::from_str(
            r#"{"Items":[{"pk":{"S":"user#1"},"age":{"N":"3"}}],"NextToken":"tok"}"#,
        )
        .unwrap();
        assert_eq!(page.next_token.as_deref(), Some("tok"));
        assert_eq!(unmarshal(&page.items[0]), json!({"pk": "user#1", "age": 3}));
    }

    #[test]
    fn key_conditions_use_placeholders_and_typed_values() {
        let args = key_condition_args("pk", "N", "42", true);
        assert_eq!(args[0], "--key-condition-expression");
        assert_eq!(args[1], "#k = :v");
        assert_eq!(args[3], r##"{"#k":"pk"}"##);
        assert_eq!(args[5], r#"{":v":{"N":"42"}}"#);

        let filter = key_condition_args("email", "S", "a@b.c", false);
        assert_eq!(filter[0], "--filter-expression");
        assert_eq!(filter[5], r#"{":v":{"S":"a@b.c"}}"#);
    }

    #[test]
    fn table_detail_reports_size_and_billing() {
        let described: DescribeTable = serde_json::from_str(
            r#"{"Table":{"TableName":"users","TableStatus":"ACTIVE","ItemCount":12,
                "TableSizeBytes":2048,"BillingModeSummary":{"BillingMode":"PAY_PER_REQUEST"},
                "KeySchema":[{"AttributeName":"pk","KeyType":"HASH"},
                             {"AttributeName":"sk","KeyType":"RANGE"}],
                "AttributeDefinitions":[{"AttributeName":"pk","AttributeType":"S"},
                                        {"AttributeName":"sk","AttributeType":"N"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            described.table.partition_key(),
            Some(("pk".to_string(), "S".to_string()))
        );
        let detail = table_detail(described.table);
        assert_eq!(
            detail.columns,
            vec!["users", "ACTIVE", "12", "2.0KB", "PAY_PER_REQUEST"]
        );
        assert_eq!(
            detail.attributes.get("sort key").map(String::as_str),
            Some("sk (N)")
        );
        assert_eq!(human_bytes(512), "512B");
    }

    #[test]
    fn stack_members_filter_by_resource_type() {
        let listed: ListStackResources = serde_json::from_str(
            r#"{"StackResourceSummaries":[
                {"PhysicalResourceId":"https://sqs/1/a","ResourceType":"AWS::SQS::Queue"},
                {"PhysicalResourceId":"fn-a","ResourceType":"AWS::Lambda::Function"},
                {"ResourceType":"AWS::SQS::Queue"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            stack_members(listed.stack_resource_summaries, "AWS::SQS::Queue"),
            vec!["https://sqs/1/a"]
        );
    }

    #[test]
    fn jump_host_candidates_join_ssm_status() {
        let instances: DescribeInstances = serde_json::from_str(
            r#"{"Reservations":[{"Instances":[
                {"InstanceId":"i-2","VpcId":"vpc-1","Tags":[{"Key":"Name","Value":"bastion"}]},
                {"InstanceId":"i-1","VpcId":"vpc-1","Tags":[]}
            ]}]}"#,
        )
        .unwrap();
        let managed: InstanceInformation = serde_json::from_str(
            r#"{"InstanceInformationList":[
                {"InstanceId":"i-2","PingStatus":"Online"},
                {"InstanceId":"i-1","PingStatus":"ConnectionLost"}
            ]}"#,
        )
        .unwrap();
        let candidates =
            jump_host_candidates(instances.reservations, managed.instance_information_list);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].instance_id, "i-1");
        assert!(!candidates[0].reachable);
        assert_eq!(candidates[1].name, "bastion");
        assert!(candidates[1].reachable);
        assert_eq!(candidates[1].network_id.as_deref(), Some("vpc-1"));
    }

    #[test]
    fn only_available_execute_api_endpoints_are_used() {
        let described: DescribeVpcEndpoints = serde_json::from_str(
            r#"{"VpcEndpoints":[
                {"VpcEndpointId":"vpce-s3","ServiceName":"com.amazonaws.eu-west-1.s3","State":"available"},
                {"VpcEndpointId":"vpce-pending","ServiceName":"com.amazonaws.eu-west-1.execute-api","State":"pending"},
                {"VpcEndpointId":"vpce-api","ServiceName":"com.amazonaws.eu-west-1.execute-api","State":"available"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            execute_api_endpoint(described.vpc_endpoints).as_deref(),
            Some("vpce-api")
        );
    }

    #[test]
    fn private_gateway_host_embeds_endpoint_id() {
        let target = TunnelTarget::private(
            "internal",
            "a1b2.execute-api.eu-west-1.amazonaws.com",
            443,
            None,
        );
        let mut route = SessionRoute {
            target,
            jump_host: Some(JumpHostCandidate::default()),
            private_endpoint: Some("vpce-9".to_string()),
        };
        assert_eq!(
            remote_host_for(&route),
            "a1b2-vpce-9.execute-api.eu-west-1.amazonaws.com"
        );

        route.private_endpoint = None;
        assert_eq!(
            remote_host_for(&route),
            "a1b2.execute-api.eu-west-1.amazonaws.com"
        );
    }
}
