use crate::domain::{
    Agent, BrokerCerts, Credentials, Heartbeat, ImageDefinition, PortAllocations, PortRange,
    ServiceBinding, ServiceInstance,
};
use crate::error::{BrokerError, Result};
use crate::persistence::BrokerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn violates(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(code))
}

fn ports_to_db(ports: impl IntoIterator<Item = u16>) -> Vec<i32> {
    ports.into_iter().map(i32::from).collect()
}

fn ports_from_db(ports: Vec<i32>) -> impl Iterator<Item = u16> {
    ports.into_iter().filter_map(|p| u16::try_from(p).ok())
}

fn port_from_db(port: i32) -> u16 {
    u16::try_from(port).unwrap_or_default()
}

fn agent_from_row(r: &PgRow) -> Agent {
    Agent {
        service_host: r.get("service_host"),
        docker_host: r.get("docker_host"),
        docker_port: port_from_db(r.get("docker_port")),
        is_active: r.get("is_active"),
        last_ping: r.get("last_ping"),
        ping_interval_secs: r.get("ping_interval_secs"),
        perf_factor: r.get("perf_factor"),
        exec_command: r.get("exec_command"),
        exec_args: r.get("exec_args"),
        port_range: PortRange::from_bounds(
            port_from_db(r.get("port_min")),
            port_from_db(r.get("port_max")),
        ),
        allocated_ports: ports_from_db(r.get("port_bindings")).collect(),
    }
}

fn instance_from_row(r: &PgRow) -> ServiceInstance {
    ServiceInstance {
        instance_id: r.get("instance_id"),
        service_name: r.get("service_name"),
        image_name: r.get("image_name"),
        agent_host: r.get("agent_host"),
        container_id: r.get("container_id"),
        container_name: r.get("container_name"),
        service_port: r
            .get::<Option<i32>, _>("service_port")
            .and_then(|p| u16::try_from(p).ok()),
        host_port: r
            .get::<Option<i32>, _>("host_port")
            .and_then(|p| u16::try_from(p).ok()),
        allocated_ports: ports_from_db(r.get("allocated_ports")).collect(),
        service_url: r.get("service_url"),
        plan_id: r.get("plan_id"),
        org_id: r.get("org_id"),
        space_id: r.get("space_id"),
        started_at: r.get("started_at"),
    }
}

fn image_from_row(r: &PgRow) -> ImageDefinition {
    ImageDefinition {
        name: r.get("name"),
        plan: r.get("plan"),
        dashboard_url: r.get::<Json<Credentials>, _>("dashboard_url").0,
        credentials: r.get::<Json<Credentials>, _>("credentials").0,
        num_instances: u32::try_from(r.get::<i32, _>("num_instances")).unwrap_or_default(),
        container_name: r.get("container_name"),
    }
}

fn certs_from_row(r: &PgRow) -> BrokerCerts {
    BrokerCerts {
        host: r.get("host"),
        client_cert: r.get("client_cert"),
        client_key: r.get("client_key"),
        ca: r.get("ca"),
    }
}

const AGENT_COLUMNS: &str = "docker_host, docker_port, service_host, is_active, last_ping, \
    ping_interval_secs, perf_factor, exec_command, exec_args, port_min, port_max, port_bindings";

const INSTANCE_COLUMNS: &str = "instance_id, service_name, image_name, agent_host, container_id, \
    container_name, service_port, host_port, allocated_ports, service_url, plan_id, org_id, \
    space_id, started_at";

#[async_trait]
impl BrokerStore for PostgresStore {
    // ==================== Agents ====================

    #[instrument(skip(self, heartbeat), fields(docker_host = %heartbeat.docker_host))]
    async fn upsert_agent(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_agents (
                docker_host, docker_port, service_host, is_active, last_ping,
                ping_interval_secs, perf_factor, exec_command, exec_args, port_min, port_max
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (docker_host) DO UPDATE SET
                docker_port = EXCLUDED.docker_port,
                service_host = EXCLUDED.service_host,
                is_active = EXCLUDED.is_active,
                last_ping = EXCLUDED.last_ping,
                ping_interval_secs = EXCLUDED.ping_interval_secs,
                perf_factor = EXCLUDED.perf_factor,
                exec_command = EXCLUDED.exec_command,
                exec_args = EXCLUDED.exec_args,
                port_min = EXCLUDED.port_min,
                port_max = EXCLUDED.port_max
            "#,
        )
        .bind(&heartbeat.docker_host)
        .bind(i32::from(heartbeat.docker_port))
        .bind(&heartbeat.service_host)
        .bind(heartbeat.is_active)
        .bind(now)
        .bind(heartbeat.keep_alive)
        .bind(heartbeat.perf_factor)
        .bind(&heartbeat.exec_command)
        .bind(&heartbeat.exec_args)
        .bind(i32::from(heartbeat.port_min))
        .bind(i32::from(heartbeat.port_max))
        .execute(&self.pool)
        .await?;

        debug!("agent heartbeat recorded");
        Ok(())
    }

    async fn live_agents(&self, now: DateTime<Utc>) -> Result<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {AGENT_COLUMNS}
            FROM service_agents
            WHERE EXTRACT(EPOCH FROM ($1 - last_ping)) < 3 * ping_interval_secs
            ORDER BY docker_host
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn get_agent(&self, docker_host: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM service_agents WHERE docker_host = $1"
        ))
        .bind(docker_host)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agent_from_row))
    }

    async fn agent_for_instance(&self, instance_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT agent_host FROM service_instances WHERE instance_id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("agent_host")))
    }

    async fn port_allocations(&self, docker_host: &str) -> Result<Option<PortAllocations>> {
        let row = sqlx::query(
            r#"
            SELECT port_min, port_max, port_bindings
            FROM service_agents WHERE docker_host = $1
            "#,
        )
        .bind(docker_host)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PortAllocations {
            range: PortRange::from_bounds(
                port_from_db(r.get("port_min")),
                port_from_db(r.get("port_max")),
            ),
            allocated: ports_from_db(r.get("port_bindings")).collect(),
        }))
    }

    #[instrument(skip(self, expected, updated))]
    async fn swap_port_allocations(
        &self,
        docker_host: &str,
        expected: &BTreeSet<u16>,
        updated: &BTreeSet<u16>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE service_agents SET port_bindings = $3
            WHERE docker_host = $1 AND port_bindings = $2
            "#,
        )
        .bind(docker_host)
        .bind(ports_to_db(expected.iter().copied()))
        .bind(ports_to_db(updated.iter().copied()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ==================== Instances ====================

    async fn get_instance(&self, instance_id: &str) -> Result<Option<ServiceInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM service_instances WHERE instance_id = $1"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(instance_from_row))
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id))]
    async fn add_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO service_instances (
                instance_id, service_name, image_name, agent_host, container_id,
                container_name, service_port, host_port, allocated_ports, service_url,
                plan_id, org_id, space_id, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.service_name)
        .bind(&instance.image_name)
        .bind(&instance.agent_host)
        .bind(&instance.container_id)
        .bind(&instance.container_name)
        .bind(instance.service_port.map(i32::from))
        .bind(instance.host_port.map(i32::from))
        .bind(ports_to_db(instance.allocated_ports.iter().copied()))
        .bind(&instance.service_url)
        .bind(&instance.plan_id)
        .bind(&instance.org_id)
        .bind(&instance.space_id)
        .bind(instance.started_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violates(&e, UNIQUE_VIOLATION) => {
                Err(BrokerError::InstanceExists(instance.instance_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Bindings ====================

    async fn add_binding(&self, binding: &ServiceBinding) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO service_bindings (instance_id, binding_id, app_id, started_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&binding.instance_id)
        .bind(&binding.binding_id)
        .bind(&binding.app_id)
        .bind(binding.started_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violates(&e, UNIQUE_VIOLATION) => Err(BrokerError::BindingExists {
                instance_id: binding.instance_id.clone(),
                binding_id: binding.binding_id.clone(),
            }),
            Err(e) if violates(&e, FOREIGN_KEY_VIOLATION) => {
                Err(BrokerError::InstanceGone(binding.instance_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM service_bindings WHERE instance_id = $1 AND binding_id = $2",
        )
        .bind(instance_id)
        .bind(binding_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Catalog ====================

    async fn list_image_definitions(&self) -> Result<Vec<ImageDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT name, plan, dashboard_url, credentials, num_instances, container_name
            FROM image_definitions ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(image_from_row).collect())
    }

    async fn get_image_definition(&self, name: &str) -> Result<Option<ImageDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT name, plan, dashboard_url, credentials, num_instances, container_name
            FROM image_definitions WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(image_from_row))
    }

    #[instrument(skip(self, image), fields(image = %image.name))]
    async fn upsert_image_definition(&self, image: &ImageDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO image_definitions (
                name, plan, dashboard_url, credentials, num_instances, container_name
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                plan = EXCLUDED.plan,
                dashboard_url = EXCLUDED.dashboard_url,
                credentials = EXCLUDED.credentials,
                num_instances = EXCLUDED.num_instances,
                container_name = EXCLUDED.container_name
            "#,
        )
        .bind(&image.name)
        .bind(&image.plan)
        .bind(Json(&image.dashboard_url))
        .bind(Json(&image.credentials))
        .bind(i32::try_from(image.num_instances).unwrap_or(i32::MAX))
        .bind(&image.container_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_image_definition(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM image_definitions WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Certificates ====================

    async fn add_certs(&self, certs: &BrokerCerts) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO broker_certificates (host, client_cert, client_key, ca)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&certs.host)
        .bind(&certs.client_cert)
        .bind(&certs.client_key)
        .bind(&certs.ca)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violates(&e, UNIQUE_VIOLATION) => {
                Err(BrokerError::CertificateExists(certs.host.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_certs(&self) -> Result<Vec<BrokerCerts>> {
        let rows = sqlx::query(
            "SELECT host, client_cert, client_key, ca FROM broker_certificates ORDER BY host",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(certs_from_row).collect())
    }

    async fn get_certs(&self, host: &str) -> Result<Option<BrokerCerts>> {
        let row = sqlx::query(
            "SELECT host, client_cert, client_key, ca FROM broker_certificates WHERE host = $1",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(certs_from_row))
    }

    async fn delete_certs(&self, host: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM broker_certificates WHERE host = $1")
            .bind(host)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
