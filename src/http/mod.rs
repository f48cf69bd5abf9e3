use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::AuthUser;
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .merge(routes::auth())
        .merge(routes::accounts())
        .merge(routes::relationships())
        .merge(routes::groups());

    Router::new()
        .merge(routes::health())
        .nest("/v1", v1)
        .with_state(state)
}
