//! Wiring: backend selection, provider registration, server startup, and
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing::info;

use freerange_core::config::{Config, LoggingConfig, QueueBackend, StoreBackend};
use freerange_core::template::HandlebarsRenderer;
use freerange_core::{Channel, NotifyError, NotifyResult, QuotaCounter};
use freerange_delivery::providers::{
    EmailProvider, PushProvider, SmsProvider, StreamProvider, WebhookProvider,
};
use freerange_delivery::queue::NotificationQueue;
use freerange_delivery::{
    Broadcaster, MemoryPresenceRegistry, MemoryQueue, MemoryRateLimiter, PresenceRegistry,
    ProviderManager, RateLimiter, RedisPresenceRegistry, RedisQueue, RedisRateLimiter, Scheduler,
    WorkerPool,
};
use freerange_store::{init_pool, MemoryStore, PostgresStore, Repositories};

use crate::middleware::{ApiKeyAuth, RateLimitMiddleware};
use crate::routes;
use crate::service::NotificationService;
use crate::validation::TokenValidator;

/// Everything the HTTP handlers and background loops share.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub queue: Arc<dyn NotificationQueue>,
    pub limiter: Arc<dyn RateLimiter>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub manager: Arc<ProviderManager>,
    pub service: Arc<NotificationService>,
    pub validator: Arc<TokenValidator>,
}

/// Initialize tracing once per process.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

pub async fn build_state(config: Config) -> NotifyResult<AppState> {
    let repos = match config.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory document store");
            let store = Arc::new(MemoryStore::new());
            Repositories {
                notifications: store.clone(),
                users: store.clone(),
                applications: store.clone(),
                templates: store,
            }
        }
        StoreBackend::Postgres => {
            info!("using postgres document store");
            let pool = init_pool(&config.store.database_url, config.store.pool_size)
                .map_err(NotifyError::from)?;
            let store = Arc::new(PostgresStore::new(pool));
            Repositories {
                notifications: store.clone(),
                users: store.clone(),
                applications: store.clone(),
                templates: store,
            }
        }
    };

    let queue: Arc<dyn NotificationQueue>;
    let limiter: Arc<dyn RateLimiter>;
    let quota: Arc<dyn QuotaCounter>;
    let presence: Arc<dyn PresenceRegistry>;
    match config.queue.backend {
        QueueBackend::Memory => {
            info!("using in-memory queues");
            queue = Arc::new(MemoryQueue::new());
            let memory_limiter = Arc::new(MemoryRateLimiter::new());
            limiter = memory_limiter.clone();
            quota = memory_limiter;
            presence = Arc::new(MemoryPresenceRegistry::new());
        }
        QueueBackend::Redis => {
            info!(url = %config.queue.redis_url, "using redis queues");
            queue = Arc::new(
                RedisQueue::connect(&config.queue.redis_url, config.queue.key_prefix.clone())
                    .await
                    .map_err(NotifyError::from)?,
            );
            let redis_limiter = Arc::new(
                RedisRateLimiter::connect(
                    &config.queue.redis_url,
                    config.queue.key_prefix.clone(),
                )
                .await?,
            );
            limiter = redis_limiter.clone();
            quota = redis_limiter;
            presence = Arc::new(
                RedisPresenceRegistry::connect(
                    &config.queue.redis_url,
                    config.queue.key_prefix.clone(),
                )
                .await?,
            );
        }
    }

    let broadcaster = Arc::new(Broadcaster::new(
        repos.notifications.clone(),
        config.broadcaster.clone(),
    ));

    let mut manager = ProviderManager::new();
    manager.register(Arc::new(PushProvider::new(config.providers.push.clone())));
    manager.register(Arc::new(EmailProvider::new(config.providers.email.clone())));
    manager.register(Arc::new(SmsProvider::new(config.providers.sms.clone())));
    manager.register(Arc::new(WebhookProvider::new(
        config.providers.webhook.clone(),
    )));
    manager.register(Arc::new(StreamProvider::new(
        broadcaster.clone(),
        Channel::InApp,
    )));
    manager.register(Arc::new(StreamProvider::new(
        broadcaster.clone(),
        Channel::Stream,
    )));
    let manager = Arc::new(manager);

    let service = Arc::new(NotificationService::new(
        repos.clone(),
        queue.clone(),
        quota,
        Arc::new(HandlebarsRenderer::new()),
    ));

    let validator = Arc::new(TokenValidator::new(config.validation.clone()));

    Ok(AppState {
        config,
        repos,
        queue,
        limiter,
        presence,
        broadcaster,
        manager,
        service,
        validator,
    })
}

/// Run the HTTP server plus (optionally) the scheduler and worker pool in
/// this process. Returns after graceful shutdown completes.
pub async fn run_server(state: AppState, run_workers: bool) -> std::io::Result<()> {
    let poll_interval = Duration::from_millis(state.config.queue.poll_interval_ms);

    let scheduler = Arc::new(Scheduler::new(
        state.queue.clone(),
        state.repos.clone(),
        poll_interval,
        state.config.queue.scheduler_batch,
    ));
    scheduler.start().await;

    let pool = Arc::new(WorkerPool::new(
        state.queue.clone(),
        state.repos.clone(),
        state.manager.clone(),
        state.config.workers.clone(),
        poll_interval,
    ));
    if run_workers {
        pool.start().await;
    }

    let bind_addr = (state.config.server.host.clone(), state.config.server.port);
    info!(host = %bind_addr.0, port = bind_addr.1, "starting http server");

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = if app_state.config.server.permissive_cors {
            Cors::permissive()
        } else {
            Cors::default()
        };
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_error_config())
            .app_data(query_error_config())
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(RateLimitMiddleware::new(app_state.limiter.clone()))
            .wrap(ApiKeyAuth::new(app_state.repos.applications.clone()))
            .configure(routes::init)
    })
    .bind(bind_addr)?
    .run();

    // Actix handles SIGTERM/SIGINT: stop accepting, drain, then return.
    let result = server.await;

    scheduler.stop().await;
    if run_workers {
        pool.stop().await;
    }
    state.broadcaster.shutdown().await;
    info!("shutdown complete");
    result
}

/// Workers and nothing else; delayed/retry promotion stays with the server
/// process that runs the scheduler.
pub async fn run_workers_only(state: AppState) -> std::io::Result<()> {
    let poll_interval = Duration::from_millis(state.config.queue.poll_interval_ms);
    let pool = WorkerPool::new(
        state.queue.clone(),
        state.repos.clone(),
        state.manager.clone(),
        state.config.workers.clone(),
        poll_interval,
    );
    pool.start().await;
    info!("worker process running, waiting for termination signal");
    tokio::signal::ctrl_c().await?;
    pool.stop().await;
    state.broadcaster.shutdown().await;
    Ok(())
}

fn json_error_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let error = NotifyError::validation(err.to_string());
        actix_web::error::InternalError::from_response(
            err,
            actix_web::HttpResponse::BadRequest().json(crate::error::error_body(&error)),
        )
        .into()
    })
}

fn query_error_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let error = NotifyError::validation(err.to_string());
        actix_web::error::InternalError::from_response(
            err,
            actix_web::HttpResponse::BadRequest().json(crate::error::error_body(&error)),
        )
        .into()
    })
}
