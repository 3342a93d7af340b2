use async_graphql::EmptySubscription;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::admin_mutations::{AdminMutation, AdminQuery};
use crate::jobs::JobContext;

pub type AdminSchema = async_graphql::Schema<AdminQuery, AdminMutation, EmptySubscription>;

/// Build the admin GraphQL schema for job history, manual triggers and tenant status
pub fn build_schema(ctx: JobContext) -> AdminSchema {
    async_graphql::Schema::build(AdminQuery, AdminMutation, EmptySubscription)
        .data(Arc::new(ctx))
        .finish()
}

#[derive(Clone)]
pub struct AdminState {
    pub schema: AdminSchema,
}

async fn graphql_handler(State(state): State<Arc<AdminState>>, req: GraphQLRequest) -> GraphQLResponse {
    state.schema.execute(req.into_inner()).await.into()
}

/// GraphiQL playground handler
async fn playground() -> impl IntoResponse {
    axum::response::Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/admin/graphql")
            .finish(),
    )
}

/// Create the admin API router
pub fn router(schema: AdminSchema) -> Router {
    let state = Arc::new(AdminState { schema });

    Router::new()
        .route("/admin/graphql", post(graphql_handler))
        .route("/admin/playground", get(playground))
        .with_state(state)
}
