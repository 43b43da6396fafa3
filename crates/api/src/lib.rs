//! HTTP services for the commerce workflow.
//!
//! One binary, four services (product, cart, order, payment), each with
//! its own router. Every router also serves `/health` and `/metrics` and
//! is wrapped in request tracing.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CartService, HttpOrderClient, HttpProductClient, OrderClient, OrderLifecycle,
    PaymentProvider, PaymentReconciler, ReconciliationSweep, SagaError, StockCoordinator,
    StripeProvider,
};
use store::{AddressStore, CartStore, OrderStore, PaymentStore, StockLedger, UserStore};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::AuthContext;
use config::{Config, Service};
use routes::orders::OrderBackend;
use state::AppState;

/// Everything a single store must provide to back any of the services.
pub trait Backend:
    StockLedger + CartStore + OrderStore + AddressStore + PaymentStore + UserStore + Clone + 'static
{
}

impl<T> Backend for T where
    T: StockLedger
        + CartStore
        + OrderStore
        + AddressStore
        + PaymentStore
        + UserStore
        + Clone
        + 'static
{
}

/// A ready-to-serve service.
pub struct App {
    pub router: Router,
    /// The reconciliation sweep, for the payment service.
    pub sweep: Option<JoinHandle<()>>,
}

/// Wires the configured service against `store`, with HTTP clients for
/// its peers.
pub fn build_app<S: Backend>(
    config: &Config,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<App, SagaError> {
    let auth = AuthContext::new(
        &config.jwt_secret,
        &config.internal_secret,
        Arc::new(store.clone()),
    );
    let prefix = config.api_prefix.as_str();

    let app = match config.service {
        Service::Product => App {
            router: product_router(AppState::new(Arc::new(store), auth), prefix, metrics_handle),
            sweep: None,
        },
        Service::Cart => {
            let coordinator = stock_coordinator(config)?;
            let carts = CartService::new(store, coordinator);
            App {
                router: cart_router(AppState::new(Arc::new(carts), auth), prefix, metrics_handle),
                sweep: None,
            }
        }
        Service::Order => {
            let coordinator = stock_coordinator(config)?;
            let orders = OrderLifecycle::new(store, coordinator);
            App {
                router: order_router(AppState::new(Arc::new(orders), auth), prefix, metrics_handle),
                sweep: None,
            }
        }
        Service::Payment => {
            let orders = HttpOrderClient::new(
                config.order_api_url(),
                &config.internal_secret,
                config.http_timeout,
            )?;
            let provider = StripeProvider::new(
                &config.stripe_api_base,
                &config.stripe_secret_key,
                config.http_timeout,
            )?;
            payment_app(
                config,
                store,
                auth,
                Arc::new(orders),
                Arc::new(provider),
                metrics_handle,
            )
        }
    };
    Ok(app)
}

fn stock_coordinator(config: &Config) -> Result<StockCoordinator, SagaError> {
    let products = HttpProductClient::new(
        config.product_api_url(),
        &config.internal_secret,
        config.http_timeout,
    )?;
    Ok(StockCoordinator::new(
        Arc::new(products),
        config.stock_check_retries,
    ))
}

/// Builds the payment service around the given peers and starts the
/// reconciliation sweep when an interval is configured.
pub fn payment_app<S: PaymentStore + 'static>(
    config: &Config,
    store: S,
    auth: AuthContext,
    orders: Arc<dyn OrderClient>,
    provider: Arc<dyn PaymentProvider>,
    metrics_handle: PrometheusHandle,
) -> App {
    let reconciler = Arc::new(PaymentReconciler::new(
        store,
        orders,
        provider,
        &config.stripe_webhook_secret,
        &config.currency,
    ));
    let sweep = config
        .reconcile_interval
        .map(|interval: Duration| ReconciliationSweep::new(reconciler.clone(), interval).spawn());

    App {
        router: payment_router(
            AppState::new(reconciler, auth),
            &config.api_prefix,
            metrics_handle,
        ),
        sweep,
    }
}

pub fn product_router<S: StockLedger + 'static>(
    state: Arc<AppState<S>>,
    prefix: &str,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::products;

    let api = Router::new()
        .route("/products", get(products::list::<S>))
        .route("/products/{id}", get(products::get::<S>))
        .route("/products/sku/{sku}", get(products::get_by_sku::<S>))
        .route("/products/stock/check", post(products::check_stock::<S>))
        .route("/admin/products", post(products::create::<S>))
        .route(
            "/admin/products/update/{sku}",
            put(products::update::<S>),
        )
        .route(
            "/admin/products/{id}/status",
            patch(products::set_status::<S>),
        )
        .route(
            "/admin/products/stock/reduce",
            post(products::admin_reduce::<S>),
        )
        .route(
            "/internal/products/stock/reduce",
            post(products::internal_reduce::<S>),
        )
        .with_state(state);
    finish(Service::Product, prefix, api, metrics_handle)
}

pub fn cart_router<S: CartStore + 'static>(
    state: Arc<AppState<CartService<S>>>,
    prefix: &str,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::carts;

    let api = Router::new()
        .route("/cart", get(carts::get::<S>).delete(carts::clear::<S>))
        .route("/cart/items", post(carts::add_item::<S>))
        .route(
            "/cart/items/{product_id}",
            put(carts::update_item::<S>).delete(carts::remove_item::<S>),
        )
        .with_state(state);
    finish(Service::Cart, prefix, api, metrics_handle)
}

pub fn order_router<S: OrderBackend>(
    state: Arc<AppState<OrderLifecycle<S>>>,
    prefix: &str,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::orders;

    let api = Router::new()
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/status", patch(orders::update_status::<S>))
        .route("/orders/{id}/cancel", patch(orders::cancel::<S>))
        .route("/internal/orders/{id}", get(orders::internal_get::<S>))
        .route(
            "/internal/orders/{id}/status",
            patch(orders::internal_update_status::<S>),
        )
        .with_state(state);
    finish(Service::Order, prefix, api, metrics_handle)
}

pub fn payment_router<S: PaymentStore + 'static>(
    state: Arc<AppState<PaymentReconciler<S>>>,
    prefix: &str,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::payments;

    let api = Router::new()
        .route("/payment-intents", post(payments::create_intent::<S>))
        .route("/payments/{id}", get(payments::get::<S>))
        .route("/webhooks/stripe", post(payments::webhook::<S>))
        .with_state(state);
    finish(Service::Payment, prefix, api, metrics_handle)
}

/// Mounts `api` under the prefix and adds the shared routes and layers.
fn finish(
    service: Service,
    prefix: &str,
    api: Router,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let name = service.as_str();
    let api = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    api.route("/health", get(move || routes::health::check(name)))
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
