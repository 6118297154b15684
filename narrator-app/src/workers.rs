//! Simulated crisis-response agents that report their tool calls.
//!
//! Each worker publishes a `started` event before a tool call and a
//! `completed` event (with the tool's result) after it, through the same
//! `EventSink` port a real agent framework would hold.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use narrator_core::EventRecord;
use narrator_core::EventSink;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::debug;

const AGENTS: &[&str] = &[
    "alert_monitor",
    "resource_coordinator",
    "evacuation_planner",
    "public_communicator",
];

const LOCATIONS: &[&str] = &["Riverside", "Hill Valley", "Oak Creek", "Harbor District"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tool {
    EmergencyAlertScan,
    ResourceAvailabilityCheck,
    EvacuationRouteAnalysis,
    CommunicationBroadcast,
}

impl Tool {
    const ALL: [Tool; 4] = [
        Tool::EmergencyAlertScan,
        Tool::ResourceAvailabilityCheck,
        Tool::EvacuationRouteAnalysis,
        Tool::CommunicationBroadcast,
    ];

    fn name(self) -> &'static str {
        match self {
            Tool::EmergencyAlertScan => "emergency_alert_scan",
            Tool::ResourceAvailabilityCheck => "resource_availability_check",
            Tool::EvacuationRouteAnalysis => "evacuation_route_analysis",
            Tool::CommunicationBroadcast => "communication_broadcast",
        }
    }

    fn args(self, rng: &mut impl Rng) -> Map<String, Value> {
        let location = pick(rng, LOCATIONS);
        let args = match self {
            Tool::EmergencyAlertScan => json!({
                "location": location,
                "alert_type": pick(rng, &["wildfire", "flood", "earthquake"]),
            }),
            Tool::ResourceAvailabilityCheck => json!({
                "resource_type": pick(rng, &["ambulances", "fire_trucks", "helicopters", "shelters"]),
                "radius_miles": rng.gen_range(5..=50),
            }),
            Tool::EvacuationRouteAnalysis => json!({
                "start_location": location,
                "destination": pick(rng, LOCATIONS),
            }),
            Tool::CommunicationBroadcast => json!({
                "message": format!("Residents of {location} should prepare to evacuate"),
                "urgency_level": pick(rng, &["advisory", "warning", "emergency"]),
            }),
        };
        match args {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn result(self, args: &Map<String, Value>, rng: &mut impl Rng) -> Value {
        let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("unknown").to_string();
        match self {
            Tool::EmergencyAlertScan => {
                let location = arg("location");
                let alerts = [
                    format!("SEVERE: Wildfire spotted {} miles from {location}", rng.gen_range(1..=5)),
                    format!("MODERATE: Evacuation route congestion detected near {location}"),
                    format!("HIGH: Emergency services responding to {} in {location}", arg("alert_type")),
                    format!("CRITICAL: Infrastructure damage reported in {location} area"),
                ];
                json!({ "alerts": pick(rng, &alerts) })
            }
            Tool::ResourceAvailabilityCheck => {
                let available = match arg("resource_type").as_str() {
                    "ambulances" => rng.gen_range(2..=8),
                    "fire_trucks" => rng.gen_range(1..=4),
                    "helicopters" => rng.gen_range(0..=2),
                    "shelters" => rng.gen_range(3..=12),
                    _ => 0,
                };
                json!({
                    "available": available,
                    "response_time": format!("{} minutes", rng.gen_range(5..=25)),
                })
            }
            Tool::EvacuationRouteAnalysis => json!({
                "primary_route": format!("Highway 101 from {} to {}", arg("start_location"), arg("destination")),
                "traffic_status": pick(rng, &["Clear", "Moderate", "Heavy", "Blocked"]),
                "estimated_time": format!("{} minutes", rng.gen_range(15..=90)),
                "alternative_routes": 2,
            }),
            Tool::CommunicationBroadcast => json!({
                "broadcast_sent": true,
                "channels": ["Emergency Alert System", "Social Media", "Local Radio"],
                "estimated_reach": format!("{} people", rng.gen_range(10_000..=100_000)),
                "urgency": arg("urgency_level"),
            }),
        }
    }
}

fn pick<T: Clone>(rng: &mut impl Rng, items: &[T]) -> T {
    // Every call site passes a non-empty constant list.
    items[rng.gen_range(0..items.len())].clone()
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub calls_per_worker: usize,
    /// Simulated tool latency range.
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            calls_per_worker: 6,
            min_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(2_500),
        }
    }
}

/// Spawn `config.workers` tasks. Each stops after its calls or once
/// `running` is cleared.
pub fn spawn_workers(
    config: &WorkerConfig,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
) -> Vec<JoinHandle<usize>> {
    (0..config.workers)
        .map(|idx| {
            let agent = format!("{}#{}", AGENTS[idx % AGENTS.len()], idx + 1);
            let sink = Arc::clone(&sink);
            let running = Arc::clone(&running);
            let config = config.clone();
            tokio::spawn(run_worker(agent, config, sink, running))
        })
        .collect()
}

async fn run_worker(
    agent: String,
    config: WorkerConfig,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
) -> usize {
    let mut rng = StdRng::from_entropy();
    let mut calls = 0;
    let min_ms = config.min_delay.as_millis() as u64;
    let max_ms = (config.max_delay.as_millis() as u64).max(min_ms);

    while calls < config.calls_per_worker && running.load(Ordering::Relaxed) {
        let tool = pick(&mut rng, &Tool::ALL);
        let args = tool.args(&mut rng);
        sink.publish(
            EventRecord::new(agent.as_str(), tool.name())
                .with_parameters(args.clone())
                .started(),
        );

        tokio::time::sleep(Duration::from_millis(rng.gen_range(min_ms..=max_ms))).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let result = tool.result(&args, &mut rng);
        debug!(agent = agent.as_str(), tool = tool.name(), "tool call completed");
        sink.publish(
            EventRecord::new(agent.as_str(), tool.name())
                .with_parameters(args)
                .completed(result),
        );
        calls += 1;
    }
    calls
}
