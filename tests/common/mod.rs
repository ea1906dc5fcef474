#![allow(dead_code)]

use std::sync::{
    Arc, Mutex, Once,
    atomic::{AtomicBool, Ordering},
};

use storefront_api::{
    db::{DbPool, create_orm_conn, create_pool, run_migrations},
    dto::auth::RegisterRequest,
    middleware::auth::AuthUser,
    models::{Category, Product, Role, User},
    notify::{EmailSink, Notifier, StatusEmail},
    services::auth_service,
    state::AppState,
};
use tokio::{sync::OnceCell, task::JoinHandle};
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct horse battery staple";

static MIGRATIONS: OnceCell<()> = OnceCell::const_new();
static JWT_SECRET_INIT: Once = Once::new();

/// Sink that records every delivery attempt. With `fail` set it returns an
/// error from each attempt while still recording it.
pub struct RecordingSink {
    sent: Mutex<Vec<StatusEmail>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let sink = Self::new();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn emails(&self) -> Vec<StatusEmail> {
        self.sent.lock().expect("sink mutex").clone()
    }
}

impl EmailSink for RecordingSink {
    fn deliver(&self, email: &StatusEmail) -> anyhow::Result<()> {
        self.sent.lock().expect("sink mutex").push(email.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("sink offline");
        }
        Ok(())
    }
}

pub struct TestCtx {
    pub state: AppState,
    pub sink: Arc<RecordingSink>,
    pub worker: JoinHandle<()>,
}

impl TestCtx {
    /// Drop every notifier handle and wait for the worker to drain the queue.
    pub async fn flush_notifications(self) -> Vec<StatusEmail> {
        let TestCtx {
            state,
            sink,
            worker,
        } = self;
        drop(state);
        worker.await.expect("notification worker panicked");
        sink.emails()
    }
}

/// Build an [`AppState`] against the configured test database, or `None` when
/// no database is available so the test can skip instead of failing.
pub async fn test_ctx() -> anyhow::Result<Option<TestCtx>> {
    test_ctx_with_sink(Arc::new(RecordingSink::new())).await
}

pub async fn test_ctx_with_sink(sink: Arc<RecordingSink>) -> anyhow::Result<Option<TestCtx>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests."
            );
            return Ok(None);
        }
    };

    JWT_SECRET_INIT.call_once(|| {
        if std::env::var("JWT_SECRET").is_err() {
            // Tests run before any thread reads the variable concurrently.
            unsafe { std::env::set_var("JWT_SECRET", "integration-test-secret") };
        }
    });

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    MIGRATIONS
        .get_or_try_init(|| async { run_migrations(&orm).await })
        .await?;

    let (notifier, worker) = Notifier::spawn(sink.clone());
    let state = AppState {
        pool,
        orm,
        notifier,
    };
    Ok(Some(TestCtx {
        state,
        sink,
        worker,
    }))
}

/// Uuid-suffixed value so parallel tests never collide on unique columns.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

pub async fn create_account(pool: &DbPool, role: Role) -> anyhow::Result<(User, AuthUser)> {
    let username = unique("user");
    let email = format!("{username}@example.com");
    let resp = auth_service::register_user(
        pool,
        RegisterRequest {
            username,
            email,
            password: TEST_PASSWORD.to_string(),
            role: Some(role),
        },
    )
    .await?;
    let user = resp.data.expect("registered user");
    let auth = AuthUser {
        user_id: user.id,
        role: user.role,
    };
    Ok((user, auth))
}

pub async fn seed_category(pool: &DbPool) -> anyhow::Result<Category> {
    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (id, name) VALUES ($1, $2) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(unique("category"))
    .fetch_one(pool)
    .await?;
    Ok(category)
}

pub async fn seed_product(
    pool: &DbPool,
    category_id: Uuid,
    price: i64,
    stock: i32,
) -> anyhow::Result<Product> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (id, name, description, price, stock, category_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(unique("product"))
    .bind("test product")
    .bind(price)
    .bind(stock)
    .bind(category_id)
    .fetch_one(pool)
    .await?;
    Ok(product)
}
