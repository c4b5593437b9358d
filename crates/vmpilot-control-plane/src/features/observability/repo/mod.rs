use prometheus::{
    opts, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    tracked_vm_count: Gauge,
    deployment_outcome_total: CounterVec,
    readiness_wait_seconds: HistogramVec,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let tracked_vm_count =
            Gauge::with_opts(opts!("vmpilot_tracked_vm_count", "VMs tracked in the registry"))
                .map_err(|e| e.to_string())?;
        let deployment_outcome_total = CounterVec::new(
            opts!(
                "vmpilot_deployment_outcome_total",
                "Deployments that reached a terminal status"
            ),
            &["status"],
        )
        .map_err(|e| e.to_string())?;
        let readiness_wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "vmpilot_readiness_wait_seconds",
                "Time spent polling for readiness (seconds)",
            )
            .buckets(vec![10.0, 30.0, 60.0, 120.0, 180.0, 240.0, 300.0]),
            &["phase", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!("vmpilot_api_request_total", "Control plane API request total"),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "vmpilot_api_request_latency_seconds",
                "Control plane API request latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(tracked_vm_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(deployment_outcome_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(readiness_wait_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            tracked_vm_count,
            deployment_outcome_total,
            readiness_wait_seconds,
            api_request_total,
            api_request_latency_seconds,
        })
    }

    pub fn set_tracked_vm_count(&self, count: f64) {
        self.tracked_vm_count.set(count);
    }

    pub fn inc_deployment_outcome(&self, status: &str) {
        self.deployment_outcome_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn observe_readiness_wait(&self, phase: &str, outcome: &str, seconds: f64) {
        self.readiness_wait_seconds
            .with_label_values(&[phase, outcome])
            .observe(seconds);
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
