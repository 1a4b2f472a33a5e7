use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use docker_broker::{
    adapters::MemoryStore,
    api::{create_router, AppState},
    broker::{BrokerManager, ProvisionerSettings},
    config::ServerConfig,
    domain::{Agent, ImageDefinition},
    error::{ExecError, Result, RuntimeError},
    persistence::BrokerStore,
    runtime::{
        ContainerExec, ContainerInspect, ContainerRuntime, ContainerSpec, CreatedContainer,
        ExecOutput, HostConfig, ImageConfig, ImageInspect, ImageSummary, NetworkSettings,
        PortBinding, RuntimeConnector,
    },
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// admin:admin
const AUTH: &str = "Basic YWRtaW46YWRtaW4=";
const VERSION: &str = "2.4";

/// Docker host double: keeps created containers and echoes their port bindings.
#[derive(Default)]
struct FakeRuntime {
    containers: Mutex<BTreeMap<String, HostConfig>>,
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_images(&self) -> std::result::Result<Vec<ImageSummary>, RuntimeError> {
        Ok(vec![
            ImageSummary {
                id: "sha256:mysql".to_string(),
                repo_tags: vec!["mysql:5.7".to_string()],
            },
            ImageSummary {
                id: "sha256:redis".to_string(),
                repo_tags: vec!["redis:latest".to_string()],
            },
        ])
    }

    async fn inspect_image(&self, id: &str) -> std::result::Result<ImageInspect, RuntimeError> {
        let exposed = BTreeMap::from([("3306/tcp".to_string(), json!({}))]);
        Ok(ImageInspect {
            id: id.to_string(),
            config: Some(ImageConfig {
                exposed_ports: exposed,
            }),
            container_config: None,
        })
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> std::result::Result<CreatedContainer, RuntimeError> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(name) {
            return Err(RuntimeError::Conflict(name.to_string()));
        }
        containers.insert(name.to_string(), spec.host_config.clone());
        Ok(CreatedContainer {
            id: format!("cid-{}", name),
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, _id: &str) -> std::result::Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop_container(
        &self,
        _id: &str,
        _timeout_secs: u64,
    ) -> std::result::Result<(), RuntimeError> {
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        let name = id.trim_start_matches("cid-");
        self.containers.lock().unwrap().remove(name);
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn inspect_container(
        &self,
        id_or_name: &str,
    ) -> std::result::Result<ContainerInspect, RuntimeError> {
        let name = id_or_name.trim_start_matches("cid-");
        let containers = self.containers.lock().unwrap();
        let host_config = containers
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))?;

        let ports = host_config
            .port_bindings
            .iter()
            .map(|(spec, bindings)| {
                let published = bindings
                    .iter()
                    .map(|b| PortBinding {
                        host_ip: "0.0.0.0".to_string(),
                        host_port: b.host_port.clone(),
                    })
                    .collect();
                (spec.clone(), Some(published))
            })
            .collect();
        Ok(ContainerInspect {
            id: format!("cid-{}", name),
            name: format!("/{}", name),
            network_settings: NetworkSettings { ports },
            host_config: Some(host_config),
        })
    }
}

struct FakeConnector(Arc<FakeRuntime>);

#[async_trait]
impl RuntimeConnector for FakeConnector {
    async fn connect(&self, _agent: &Agent) -> Result<Arc<dyn ContainerRuntime>> {
        Ok(self.0.clone())
    }
}

/// Answers the in-container scripts with templated JSON.
#[derive(Default)]
struct FakeExec {
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ContainerExec for FakeExec {
    async fn exec(
        &self,
        _agent: &Agent,
        _container_id: &str,
        argv: &[String],
    ) -> std::result::Result<ExecOutput, ExecError> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let script = argv
            .iter()
            .find(|arg| arg.starts_with('/'))
            .map(String::as_str)
            .unwrap_or_default();
        let stdout = match script {
            "/provision" => r#"{"dashboard_url":"http://$HOST:$PORT"}"#,
            "/bind" => r#"{"uri":"mysql://$HOST:$PORT_3306","port":"$PORT_3306"}"#,
            _ => "",
        };
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

struct TestContext {
    app: Router,
    store: Arc<MemoryStore>,
    runtime: Arc<FakeRuntime>,
    exec: Arc<FakeExec>,
}

impl TestContext {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::with_images([
            ImageDefinition {
                name: "mysql".to_string(),
                plan: "100".to_string(),
                num_instances: 1,
                ..Default::default()
            },
            ImageDefinition {
                name: "redis".to_string(),
                plan: "shared".to_string(),
                container_name: "redis-shared".to_string(),
                dashboard_url: BTreeMap::from([(
                    "dashboard_url".to_string(),
                    "http://redis.internal:8001".to_string(),
                )]),
                credentials: BTreeMap::from([(
                    "uri".to_string(),
                    "redis://redis.internal:6379".to_string(),
                )]),
                ..Default::default()
            },
        ]));
        let runtime = Arc::new(FakeRuntime::default());
        let exec = Arc::new(FakeExec::default());
        let manager = BrokerManager::new(
            store.clone(),
            Arc::new(FakeConnector(runtime.clone())),
            exec.clone(),
            ProvisionerSettings::default(),
            "docker",
        );
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            username: "admin".to_string(),
            password: "admin".to_string(),
        };
        let app = create_router(AppState::new(Arc::new(manager), &server));
        Self {
            app,
            store,
            runtime,
            exec,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let headers = [("Authorization", AUTH), ("X-Broker-Api-Version", VERSION)];
        send_json(&self.app, method, uri, &headers, body).await
    }

    async fn register_agent(&self) {
        let heartbeat = json!({
            "ServiceHost": "fakehost",
            "DockerHost": "agent-1",
            "DockerPort": 2375,
            "IsActive": true,
            "PerfFactor": 1.0,
            "KeepAlive": 10,
            "ExecCommand": "DockerCommandExec",
            "ExecArgs": "",
            "Portbind_min": 49000,
            "Portbind_max": 49100
        });
        let (status, body) = self.send(Method::POST, "/ping", Some(heartbeat)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    async fn allocated(&self) -> Vec<u16> {
        self.store
            .port_allocations("agent-1")
            .await
            .unwrap()
            .map(|a| a.allocated.into_iter().collect())
            .unwrap_or_default()
    }
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (key, value) in headers {
        request_builder = request_builder.header(*key, *value);
    }

    let request = if let Some(payload) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("failed to build request")
    } else {
        request_builder
            .body(Body::empty())
            .expect("failed to build request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));

    (status, body)
}

#[tokio::test]
async fn rejects_missing_version_and_bad_credentials() {
    let ctx = TestContext::new();

    let (status, _) = send_json(
        &ctx.app,
        Method::GET,
        "/v2/catalog",
        &[("Authorization", AUTH)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &ctx.app,
        Method::GET,
        "/v2/catalog",
        &[("X-Broker-Api-Version", VERSION)],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // admin:wrong
    let (status, _) = send_json(
        &ctx.app,
        Method::GET,
        "/v2/catalog",
        &[
            ("Authorization", "Basic YWRtaW46d3Jvbmc="),
            ("X-Broker-Api-Version", VERSION),
        ],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn catalog_lists_one_service_per_image() {
    let ctx = TestContext::new();
    let (status, body) = ctx.send(Method::GET, "/v2/catalog", None).await;
    assert_eq!(status, StatusCode::OK);

    let services = body["services"].as_array().expect("services array");
    assert_eq!(services.len(), 2);
    let mysql = services.iter().find(|s| s["name"] == "mysql").unwrap();
    assert_eq!(mysql["id"], "mysql");
    assert_eq!(mysql["bindable"], true);
    assert_eq!(mysql["plans"][0]["id"], "mysql_100");
}

#[tokio::test]
async fn provision_without_agents_fails() {
    let ctx = TestContext::new();
    let (status, body) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/i1",
            Some(json!({"service_id": "mysql", "plan_id": "mysql_100"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["description"], "no agents available");
}

#[tokio::test]
async fn script_instance_lifecycle() {
    let ctx = TestContext::new();
    ctx.register_agent().await;

    let (status, body) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/i1",
            Some(json!({
                "service_id": "mysql",
                "plan_id": "mysql_100",
                "organization_guid": "org",
                "space_guid": "space"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["dashboard_url"], "http://fakehost:49000");
    assert_eq!(ctx.allocated().await, vec![49000]);

    let (status, _) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/i1",
            Some(json!({"service_id": "mysql", "plan_id": "mysql_100"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/i1/service_bindings/b1",
            Some(json!({"service_id": "mysql", "plan_id": "mysql_100", "app_guid": "app"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(
        body,
        json!({"credentials": {"port": "49000", "uri": "mysql://fakehost:49000"}})
    );

    let (status, body) = ctx
        .send(
            Method::DELETE,
            "/v2/service_instances/i1/service_bindings/b1?service_id=mysql&plan_id=mysql_100",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, _) = ctx
        .send(Method::DELETE, "/v2/service_instances/i1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ctx.allocated().await.is_empty());
    assert_eq!(*ctx.runtime.removed.lock().unwrap(), vec!["cid-i1".to_string()]);

    let scripts: Vec<String> = ctx
        .exec
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter_map(|argv| argv.iter().find(|a| a.starts_with('/')).cloned())
        .collect();
    assert_eq!(scripts, ["/provision", "/bind", "/unbind", "/deprovision"]);

    let (status, body) = ctx
        .send(Method::DELETE, "/v2/service_instances/i1", None)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["description"], "Failed to find the service instance (i1)");
}

#[tokio::test]
async fn static_instance_shares_container() {
    let ctx = TestContext::new();
    ctx.register_agent().await;

    for instance in ["s1", "s2"] {
        let (status, body) = ctx
            .send(
                Method::PUT,
                &format!("/v2/service_instances/{}", instance),
                Some(json!({"service_id": "redis", "plan_id": "redis_shared"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["dashboard_url"], "http://redis.internal:8001");
    }

    let (status, body) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/s1/service_bindings/b1",
            Some(json!({"service_id": "redis", "plan_id": "redis_shared"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["credentials"]["uri"], "redis://redis.internal:6379");

    let (status, _) = ctx
        .send(Method::DELETE, "/v2/service_instances/s1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ctx.runtime.removed.lock().unwrap().is_empty());
    assert!(ctx.exec.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_image_is_gone() {
    let ctx = TestContext::new();
    ctx.register_agent().await;

    let (status, _) = ctx
        .send(
            Method::PUT,
            "/v2/service_instances/i9",
            Some(json!({"service_id": "postgres", "plan_id": "x"})),
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert!(ctx.allocated().await.is_empty());
}

#[tokio::test]
async fn image_admin_routes() {
    let ctx = TestContext::new();

    let (status, _) = ctx
        .send(
            Method::PUT,
            "/docker/image/postgres",
            Some(json!({"plan": "small", "num_instances": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx.send(Method::GET, "/docker/image/postgres", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "postgres");
    assert_eq!(body["plan"], "small");

    let (status, body) = ctx.send(Method::GET, "/docker/images", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, _) = ctx.send(Method::GET, "/other/images", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = ctx.send(Method::DELETE, "/docker/image/postgres", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = ctx.send(Method::GET, "/docker/image/postgres", None).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn certificates_are_masked() {
    let ctx = TestContext::new();
    let certs = json!({
        "ClientCert": "Q0VSVA==",
        "ClientKey": "c2VjcmV0LWtleQ==",
        "CA": null
    });

    let (status, _) = ctx
        .send(Method::PUT, "/certificate/agent-1", Some(certs.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = ctx
        .send(Method::PUT, "/certificate/agent-1", Some(certs))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = ctx.send(Method::GET, "/certificate/agent-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Host"], "agent-1");
    // "4" and "10", base64 encoded
    assert_eq!(body["ClientCert"], "NA==");
    assert_eq!(body["ClientKey"], "MTA=");

    let (status, body) = ctx.send(Method::GET, "/certificates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = ctx.send(Method::DELETE, "/certificate/agent-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = ctx.send(Method::GET, "/certificate/agent-1", None).await;
    assert_eq!(status, StatusCode::GONE);
}
