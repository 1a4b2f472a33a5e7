//! Agent selection for new instances.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

use crate::domain::Agent;
use crate::error::{BrokerError, Result};
use crate::persistence::BrokerStore;

/// Live agents sharing the lowest perf factor, one picked uniformly at random.
pub fn pick_agent<R: Rng + ?Sized>(
    agents: Vec<Agent>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Agent> {
    let live: Vec<Agent> = agents
        .into_iter()
        .filter(|agent| agent.is_live(now) && !agent.perf_factor.is_nan())
        .collect();

    let min = live
        .iter()
        .map(|agent| agent.perf_factor)
        .fold(f64::INFINITY, f64::min);

    let candidates: Vec<Agent> = live
        .into_iter()
        .filter(|agent| agent.perf_factor == min)
        .collect();

    candidates
        .choose(rng)
        .cloned()
        .ok_or(BrokerError::NoAgentsAvailable)
}

pub struct Dispatcher {
    store: Arc<dyn BrokerStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn BrokerStore>) -> Self {
        Self { store }
    }

    pub async fn select_agent(&self) -> Result<Agent> {
        let now = Utc::now();
        let agents = self.store.live_agents(now).await?;
        let agent = pick_agent(agents, now, &mut rand::thread_rng())?;
        debug!(
            docker_host = %agent.docker_host,
            perf_factor = agent.perf_factor,
            "dispatching to agent"
        );
        Ok(agent)
    }
}
