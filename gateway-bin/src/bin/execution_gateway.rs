//! `execution-gateway`: the one binary this workspace ships (§4.16, C16).
//!
//! Replaces the teacher's per-strategy binary family with a single
//! process, parameterized by `--exchange`, that speaks the execution-path
//! bus contract (§6) for exactly one venue at a time.
//!
//! Startup sequence: parse CLI -> init logging -> load config -> construct
//! the tracker -> construct the venue router and register the one adapter
//! matching `--exchange` -> spawn the metrics server -> spawn ingress/
//! egress threads -> install the kill switch's signal handler -> block
//! until the kill switch flips -> join every thread -> exit.

use clap::Parser;
use gateway_core::adapter::bybit::BybitAdapter;
use gateway_core::adapter::hyperliquid::HyperliquidAdapter;
use gateway_core::adapter::{ExchangeAdapter, VenueRouter};
use gateway_core::bus::{EgressPlane, IngressEvent, IngressPlane};
use gateway_core::config::{CliArgs, GatewayConfig};
use gateway_core::core::errors::GatewayError;
use gateway_core::core::types::{
    IntentAction, NormalizedOrderRequest, OrderIntent, OrderResponse, OrderState, OrderUpdate,
};
use gateway_core::monitoring::{MetricsRegistry, MetricsServer, MetricsServerConfig};
use gateway_core::resilience::KillSwitch;
use gateway_core::tracker::OrderTracker;
use gateway_core::utils::init_logger;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Logging comes up before config resolution so a config error is
    // itself logged rather than only printed.
    init_logger(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()), false);

    let config = match GatewayConfig::load(cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "startup configuration error");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal runtime error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| GatewayError::Config(format!("metrics registry init failed: {e}")))?,
    );

    let tracker = Arc::new(OrderTracker::new(Some(metrics.clone())));

    let mut router = VenueRouter::new();
    let adapter: Box<dyn ExchangeAdapter> = match config.exchange.as_str() {
        "bybit" => Box::new(BybitAdapter::new(Some(metrics.clone()))),
        "hyperliquid" => Box::new(HyperliquidAdapter::new(Some(metrics.clone()), config.hyperliquid.clone())),
        other => {
            return Err(GatewayError::Config(format!(
                "unsupported --exchange '{other}': expected 'bybit' or 'hyperliquid'"
            )))
        }
    };
    router.register(config.exchange.clone(), adapter);
    let router = Arc::new(router);

    let adapter = router
        .get(&config.exchange)
        .expect("adapter was just registered under this venue name");

    if !adapter.initialize(&config.credentials.api_key, &config.credentials.api_secret, config.credentials.testnet) {
        return Err(GatewayError::Config(format!(
            "adapter initialization failed for venue '{}'",
            config.exchange
        )));
    }

    let egress = EgressPlane::bind(&config.bus.reports_out_endpoint, Some(metrics.clone()))?;
    wire_adapter_callbacks(adapter, tracker.clone(), config.exchange.clone(), metrics.clone());
    wire_tracker_callbacks(&tracker, egress.clone(), config.exchange.clone(), metrics.clone());

    if !adapter.connect() {
        return Err(GatewayError::Config(format!(
            "initial connect failed for venue '{}'",
            config.exchange
        )));
    }
    metrics.venues().connected.with_label_values(&[config.exchange.as_str()]).set(1);

    let kill_switch = KillSwitch::install();
    let shutdown = Arc::new(AtomicBool::new(false));

    let publisher_handle = egress.clone().spawn_publisher(shutdown.clone());

    let metrics_addr = config.metrics_addr.clone();
    let metrics_for_server = metrics.clone();
    let metrics_shutdown = shutdown.clone();
    let metrics_handle = std::thread::Builder::new()
        .name("metrics-server".to_string())
        .spawn(move || run_metrics_server(metrics_addr, metrics_for_server, metrics_shutdown))
        .expect("failed to spawn metrics server thread");

    let ingress = IngressPlane::bind(&config.bus.orders_in_endpoint, Some(metrics.clone()))?;
    let ingress_handle = spawn_ingress_worker(
        ingress,
        router.clone(),
        tracker.clone(),
        egress.clone(),
        metrics.clone(),
        kill_switch.clone(),
    );

    info!(
        exchange = %config.exchange,
        orders_in = %config.bus.orders_in_endpoint,
        reports_out = %config.bus.reports_out_endpoint,
        "execution gateway running"
    );

    while !kill_switch.should_stop() {
        std::thread::sleep(Duration::from_millis(200));
    }
    info!("kill switch tripped, shutting down");

    shutdown.store(true, Ordering::Release);
    let _ = ingress_handle.join();
    let _ = publisher_handle.join();
    adapter.disconnect();
    metrics.venues().connected.with_label_values(&[config.exchange.as_str()]).set(0);
    // The metrics server has no cooperative shutdown path (§4.16 lists it
    // as the process's one async pocket, outside the thread-per-component
    // shutdown contract); drop it rather than block exit on its join.
    drop(metrics_handle);

    Ok(())
}

/// Feed adapter callbacks (order-update, fill, error) into the tracker.
fn wire_adapter_callbacks(
    adapter: &dyn ExchangeAdapter,
    tracker: Arc<OrderTracker>,
    venue: String,
    metrics: Arc<MetricsRegistry>,
) {
    let tracker_for_update = tracker.clone();
    adapter.set_order_update_callback(Box::new(move |update: OrderUpdate| {
        match OrderState::from_wire_str(&update.status) {
            Some(state) => {
                tracker_for_update.process_order_update(&update.client_id, state, update.exchange_id.as_deref());
                if let Some(fill) = update.fill.clone() {
                    tracker_for_update.process_trade_update(&update.client_id, fill);
                }
            }
            None => warn!(status = %update.status, "adapter emitted an unrecognized order status"),
        }
    }));

    let tracker_for_fill = tracker.clone();
    let metrics_for_fill = metrics.clone();
    let venue_for_fill = venue.clone();
    adapter.set_fill_callback(Box::new(move |fill| {
        tracker_for_fill.process_trade_update(&fill.client_id, fill);
        metrics_for_fill.orders().fills_total.with_label_values(&[venue_for_fill.as_str()]).inc();
    }));

    adapter.set_error_callback(Box::new(move |err: GatewayError| {
        error!(venue = %venue, error = %err, "adapter-internal error");
    }));
}

/// Republish tracker state transitions and fills onto the egress ring
/// (§4.12: adapter callback threads must never block on network I/O, so
/// the tracker's own callbacks only enqueue).
fn wire_tracker_callbacks(
    tracker: &OrderTracker,
    egress: Arc<EgressPlane>,
    venue: String,
    metrics: Arc<MetricsRegistry>,
) {
    let egress_for_update = egress.clone();
    tracker.set_order_update_callback(Box::new(move |order| {
        let mut update = OrderUpdate::new(order.client_id.clone(), order.state.as_wire_str());
        update.exchange_id = order.exchange_id.clone();
        egress_for_update.enqueue(update);
    }));

    let egress_for_fill = egress.clone();
    tracker.set_fill_callback(Box::new(move |order, fill| {
        let mut update = OrderUpdate::new(order.client_id.clone(), order.state.as_wire_str());
        update.exchange_id = order.exchange_id.clone();
        update.fill = Some(fill.clone());
        egress_for_fill.enqueue(update);
    }));

    let venue_for_completed = venue.clone();
    let metrics_for_completed = metrics.clone();
    tracker.set_completed_callback(Box::new(move |order| {
        if order.state == OrderState::Canceled {
            metrics_for_completed.orders().canceled_total.with_label_values(&[venue_for_completed.as_str()]).inc();
        }
    }));
}

/// The ingress worker: one thread, one `PULL` socket, cooperative shutdown
/// via the kill switch (§5 "shutdown is cooperative via an atomic flag
/// plus closing the relevant sockets").
fn spawn_ingress_worker(
    mut ingress: IngressPlane,
    router: Arc<VenueRouter>,
    tracker: Arc<OrderTracker>,
    egress: Arc<EgressPlane>,
    metrics: Arc<MetricsRegistry>,
    kill_switch: KillSwitch,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("ingress-worker".to_string())
        .spawn(move || {
            while !kill_switch.should_stop() {
                match ingress.recv_intent() {
                    Ok(Some(IngressEvent::Intent(intent))) => {
                        handle_intent(intent, &router, &tracker, &egress, &metrics);
                    }
                    Ok(Some(IngressEvent::Rejected { client_id, error })) => {
                        let id = client_id.unwrap_or_default();
                        let mut update = OrderUpdate::new(id, "rejected");
                        update.reason = Some(error.to_string());
                        let _ = egress.publish_now(&update);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "ingress transport error");
                    }
                }
            }
        })
        .expect("failed to spawn ingress worker thread")
}

fn handle_intent(
    intent: OrderIntent,
    router: &VenueRouter,
    tracker: &OrderTracker,
    egress: &EgressPlane,
    metrics: &Arc<MetricsRegistry>,
) {
    let Some(adapter) = router.get(&intent.venue) else {
        reject(egress, &intent.client_id, &GatewayError::UnknownVenue(intent.venue.clone()), metrics, &intent.venue);
        return;
    };

    match intent.action {
        IntentAction::Place => handle_place(&intent, adapter, tracker, egress, metrics),
        IntentAction::Cancel => handle_cancel(&intent, adapter, egress, metrics),
        IntentAction::Replace => handle_replace(&intent, adapter, egress, metrics),
    }
}

fn handle_place(
    intent: &OrderIntent,
    adapter: &dyn ExchangeAdapter,
    tracker: &OrderTracker,
    egress: &EgressPlane,
    metrics: &Arc<MetricsRegistry>,
) {
    let req = match NormalizedOrderRequest::try_from_intent(intent) {
        Ok(req) => req,
        Err(e) => {
            reject(egress, &intent.client_id, &e, metrics, &intent.venue);
            return;
        }
    };

    // Track before submit (§3 Lifecycle): register the in-flight order
    // before the adapter call so an inbound WS event racing the REST
    // response still has somewhere to land.
    tracker.start_tracking(&req, req.order_type);

    let side = req.side.to_string();
    let response = adapter.place_order(&req);
    if response.success {
        let mut update = OrderUpdate::new(response.client_id.clone(), response.status.as_deref().unwrap_or("accepted"));
        update.exchange_id = response.exchange_order_id.clone();
        let _ = egress.publish_now(&update);
        metrics.orders().placed_total.with_label_values(&[intent.venue.as_str(), side.as_str()]).inc();
    } else {
        let reason_code = response
            .extra
            .get("reason_code")
            .and_then(|v| v.as_str())
            .unwrap_or("venue_rejected");
        let mut update = OrderUpdate::new(response.client_id.clone(), "rejected");
        update.reason = Some(response.message.clone());
        let _ = egress.publish_now(&update);
        metrics.orders().rejected_total.with_label_values(&[intent.venue.as_str(), reason_code]).inc();
    }
}

fn handle_cancel(intent: &OrderIntent, adapter: &dyn ExchangeAdapter, egress: &EgressPlane, metrics: &Arc<MetricsRegistry>) {
    let symbol = intent.detail_str("symbol");
    let exchange_id = intent.detail_str("exchange_order_id");
    let response = adapter.cancel_order(&intent.client_id, symbol, exchange_id);
    publish_response(&response, egress, &intent.venue, metrics);
}

fn handle_replace(intent: &OrderIntent, adapter: &dyn ExchangeAdapter, egress: &EgressPlane, metrics: &Arc<MetricsRegistry>) {
    let new_quantity = intent
        .detail_str("quantity")
        .and_then(|s| s.parse::<rust_decimal::Decimal>().ok());
    let new_price = intent
        .detail_str("price")
        .and_then(|s| s.parse::<rust_decimal::Decimal>().ok());
    let response = adapter.modify_order(&intent.client_id, new_quantity, new_price);
    publish_response(&response, egress, &intent.venue, metrics);
}

fn publish_response(
    response: &OrderResponse,
    egress: &EgressPlane,
    venue: &str,
    metrics: &Arc<MetricsRegistry>,
) {
    let status = response.status.as_deref().unwrap_or(if response.success { "accepted" } else { "rejected" });
    let mut update = OrderUpdate::new(response.client_id.clone(), status);
    update.exchange_id = response.exchange_order_id.clone();
    if !response.success {
        update.reason = Some(response.message.clone());
    }
    let _ = egress.publish_now(&update);
    if response.success && status == "canceled" {
        metrics.orders().canceled_total.with_label_values(&[venue]).inc();
    }
}

fn reject(egress: &EgressPlane, client_id: &str, err: &GatewayError, metrics: &Arc<MetricsRegistry>, venue: &str) {
    let mut update = OrderUpdate::new(client_id, "rejected");
    update.reason = Some(err.to_string());
    let _ = egress.publish_now(&update);
    metrics.orders().rejected_total.with_label_values(&[venue, err.reason_code()]).inc();
}

/// The one async pocket in the process (§4.15): a small single-threaded
/// tokio runtime carrying nothing but the Prometheus HTTP endpoint.
fn run_metrics_server(listen_addr: String, metrics: Arc<MetricsRegistry>, shutdown: Arc<AtomicBool>) {
    let addr = match listen_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(addr = %listen_addr, error = %e, "invalid metrics listen address, metrics server disabled");
            return;
        }
    };
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build metrics server runtime");
            return;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig { listen_addr: addr, metrics_path: "/metrics".to_string() }, metrics);
    runtime.block_on(async {
        tokio::select! {
            result = server.serve() => {
                if let Err(e) = result {
                    error!(error = %e, "metrics server exited");
                }
            }
            _ = wait_for_shutdown(shutdown) => {}
        }
    });
}

async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
