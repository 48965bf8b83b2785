//! Router assembly: one axum `Router` per configured table, with a route per mounted operation.
//!
//! | path      | GET       | POST                              | PUT         | PATCH      | DELETE      |
//! |-----------|-----------|-----------------------------------|-------------|------------|-------------|
//! | `/`       | FIND_MANY | CREATE_ONE / UPSERT_ONE / PRG, UPSERT_MANY | UPDATE_MANY | PATCH_MANY | DELETE_MANY |
//! | `/:pk`    | FIND_ONE  |                                   | UPDATE_ONE  | PATCH_ONE  | DELETE_ONE  |

use crate::config::ResolvedRouter;
use crate::handlers::table::{collection, item, missing_item, post_root};
use crate::schema::{OperationKind, OperationSchema};
use crate::service::{CrudService, RequestDecoder};
use crate::state::{Endpoint, PostRoot};
use crate::store::Database;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post, put, MethodRouter};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

pub struct TableRouter {
    prefix: String,
    schemas: Vec<Arc<OperationSchema>>,
    router: Router,
}

impl TableRouter {
    pub fn build(db: Arc<dyn Database>, resolved: ResolvedRouter) -> Self {
        let ResolvedRouter { config, table, rules } = resolved;
        let ops = config.operations();
        let prefix = config.prefix.clone();
        let body_limit = config.body_limit;
        let service = Arc::new(CrudService::new(db, table.clone(), Arc::new(config)));

        let mut schemas = Vec::with_capacity(ops.len());
        let mut root: Option<MethodRouter> = None;
        let mut keyed: Option<MethodRouter> = None;
        let mut post_root_state = PostRoot::default();

        for &op in &ops {
            let schema = Arc::new(OperationSchema::build(op, &table, &rules));
            schemas.push(schema.clone());
            let endpoint = Arc::new(Endpoint {
                decoder: RequestDecoder::new(table.clone(), schema),
                service: service.clone(),
            });
            match op {
                OperationKind::UpsertMany => post_root_state.batch = Some(endpoint),
                op if op.mounts_on_post_root() => post_root_state.single = Some(endpoint),
                op if op.by_primary_key() => {
                    let m = keyed_method(op, endpoint);
                    keyed = Some(match keyed {
                        Some(prev) => prev.merge(m),
                        None => m,
                    });
                }
                op => {
                    let m = collection_method(op, endpoint);
                    root = Some(match root {
                        Some(prev) => prev.merge(m),
                        None => m,
                    });
                }
            }
        }

        if !post_root_state.is_empty() {
            let m = post(post_root).with_state(post_root_state);
            root = Some(match root {
                Some(prev) => prev.merge(m),
                None => m,
            });
        }
        if ops.contains(&OperationKind::PostRedirectGet) && !ops.contains(&OperationKind::FindOne) {
            let m: MethodRouter = get(missing_item);
            keyed = Some(match keyed {
                Some(prev) => prev.merge(m),
                None => m,
            });
        }

        let mut router = Router::new();
        if let Some(m) = root {
            router = router.route("/", m);
        }
        if let Some(m) = keyed {
            router = router.route("/:pk", m);
        }
        if let Some(limit) = body_limit {
            router = router.layer(
                ServiceBuilder::new()
                    .layer(RequestBodyLimitLayer::new(limit))
                    .layer(DefaultBodyLimit::disable()),
            );
        }

        let names: Vec<&str> = ops.iter().map(|o| o.as_str()).collect();
        tracing::info!(table = %table.name, prefix = %prefix, operations = ?names, "table router assembled");
        TableRouter {
            prefix,
            schemas,
            router,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Schema of every mounted operation, for publishing request and response documentation.
    pub fn schemas(&self) -> &[Arc<OperationSchema>] {
        &self.schemas
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

fn collection_method(op: OperationKind, endpoint: Arc<Endpoint>) -> MethodRouter {
    let m = match op {
        OperationKind::UpdateMany => put(collection),
        OperationKind::PatchMany => patch(collection),
        OperationKind::DeleteMany => delete(collection),
        _ => get(collection),
    };
    m.with_state(endpoint)
}

fn keyed_method(op: OperationKind, endpoint: Arc<Endpoint>) -> MethodRouter {
    let m = match op {
        OperationKind::UpdateOne => put(item),
        OperationKind::PatchOne => patch(item),
        OperationKind::DeleteOne => delete(item),
        _ => get(item),
    };
    m.with_state(endpoint)
}

/// Mount every table router under its prefix.
pub fn table_routes(db: Arc<dyn Database>, routers: Vec<ResolvedRouter>) -> (Router, Vec<Arc<OperationSchema>>) {
    let mut app = Router::new();
    let mut schemas = Vec::new();
    for resolved in routers {
        let table_router = TableRouter::build(db.clone(), resolved);
        schemas.extend(table_router.schemas().iter().cloned());
        let prefix = table_router.prefix().to_string();
        let router = table_router.into_router();
        app = if prefix == "/" {
            app.merge(router)
        } else {
            app.nest(&prefix, router)
        };
    }
    (app, schemas)
}
