//! Route registration.
//!
//! Registration order matters for the literal-vs-parameter paths:
//! `/notifications/unread` and `/notifications/batch` must be mounted
//! before `/notifications/{id}` handlers.

pub mod admin;
pub mod health;
pub mod notifications;
pub mod presence;
pub mod stream;

use actix_web::web;

pub fn init(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health);
    cfg.service(
        web::scope("/v1")
            .service(notifications::unread_count)
            .service(notifications::unread_list)
            .service(notifications::mark_read)
            .service(notifications::send_bulk)
            .service(notifications::send_batch)
            .service(notifications::cancel_batch)
            .service(notifications::send)
            .service(notifications::list)
            .service(notifications::get)
            .service(notifications::update_status)
            .service(notifications::cancel)
            .service(notifications::retry)
            .service(stream::sse)
            .service(presence::check_in)
            .service(admin::queue_stats)
            .service(admin::dlq_list)
            .service(admin::dlq_replay),
    );
}
