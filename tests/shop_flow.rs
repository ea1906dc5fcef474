use axum::{
    Json,
    extract::{Path, State},
};
use storefront_api::{
    dto::{
        auth::{LoginRequest, LogoutRequest, RefreshRequest},
        cart::AddToCartRequest,
        catalog::{CreateCategoryRequest, UpdateCategoryRequest},
        orders::UpdateOrderStatusRequest,
    },
    error::{AppError, CheckoutError},
    models::{OrderStatus, Role},
    routes::{
        categories,
        params::{OrderListQuery, SortOrder},
    },
    services::{admin_service, auth_service, cart_service, order_service},
};
use uuid::Uuid;

mod common;

use common::{RecordingSink, TEST_PASSWORD, create_account, seed_category, seed_product, unique};

#[tokio::test]
async fn register_login_and_profile() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;

    let (user, auth) = create_account(pool, Role::Customer).await?;

    // The password hash must never serialize.
    let json = serde_json::to_value(&user)?;
    assert!(json.get("password_hash").is_none());
    assert_eq!(json["email"], serde_json::json!(user.email));

    let err = auth_service::login_user(
        pool,
        LoginRequest {
            email: user.email.clone(),
            password: "wrong".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg == "Invalid email or password"));

    let login = auth_service::login_user(
        pool,
        LoginRequest {
            email: user.email.clone(),
            password: TEST_PASSWORD.to_string(),
        },
    )
    .await?
    .data
    .expect("tokens");
    assert!(!login.access.is_empty());
    assert!(!login.refresh.is_empty());

    let profile = auth_service::profile(pool, &auth).await?.data.expect("profile");
    assert_eq!(profile.id, user.id);
    assert_eq!(profile.email, user.email);

    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_rejected() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;

    let (user, _) = create_account(pool, Role::Customer).await?;

    let err = auth_service::register_user(
        pool,
        storefront_api::dto::auth::RegisterRequest {
            username: unique("other"),
            email: user.email.clone(),
            password: TEST_PASSWORD.to_string(),
            role: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg == "Email is already taken"));

    Ok(())
}

#[tokio::test]
async fn category_names_are_unique_case_insensitively() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = ctx.state.pool.clone();
    let (_, staff) = create_account(&pool, Role::Admin).await?;

    let name = unique("Gadgets");
    let (_, Json(created)) = categories::create_category(
        State(pool.clone()),
        staff.clone(),
        Json(CreateCategoryRequest {
            name: name.clone(),
            description: None,
        }),
    )
    .await?;
    let category = created.data.expect("category");

    // Same name, different case.
    let err = categories::create_category(
        State(pool.clone()),
        staff.clone(),
        Json(CreateCategoryRequest {
            name: name.to_uppercase(),
            description: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg.contains("already exists")));

    // Re-casing a record's own name is not a collision with itself.
    let Json(updated) = categories::update_category(
        State(pool.clone()),
        staff.clone(),
        Path(category.id),
        Json(UpdateCategoryRequest {
            name: Some(name.to_uppercase()),
            description: None,
        }),
    )
    .await?;
    assert_eq!(updated.data.expect("category").name, name.to_uppercase());

    // Customers cannot touch the catalog.
    let (_, customer) = create_account(&pool, Role::Customer).await?;
    let err = categories::create_category(
        State(pool.clone()),
        customer,
        Json(CreateCategoryRequest {
            name: unique("Gizmos"),
            description: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    Ok(())
}

#[tokio::test]
async fn adding_the_same_product_twice_merges_the_line() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 150, 10).await?;

    let first = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?
    .data
    .expect("cart item");
    assert_eq!(first.quantity, 2);

    let second = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 3,
        },
    )
    .await?
    .data
    .expect("cart item");
    assert_eq!(second.id, first.id, "same line, not a new row");
    assert_eq!(second.quantity, 5);

    let view = cart_service::view_cart(pool, &buyer, first.cart_id)
        .await?
        .data
        .expect("cart view");
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.items[0].line_total, 150 * 5);

    let err = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn checkout_freezes_prices_and_empties_the_cart() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let pool = &state.pool;
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let cheap = seed_product(pool, category.id, 100, 10).await?;
    let pricey = seed_product(pool, category.id, 250, 10).await?;

    let line = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: cheap.id,
            quantity: 2,
        },
    )
    .await?
    .data
    .expect("cart item");
    cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: pricey.id,
            quantity: 1,
        },
    )
    .await?;

    let placed = order_service::checkout(state, &buyer)
        .await?
        .data
        .expect("order");
    assert_eq!(placed.order.total_price, 2 * 100 + 250);
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.items.len(), 2);

    let view = cart_service::view_cart(pool, &buyer, line.cart_id)
        .await?
        .data
        .expect("cart view");
    assert!(view.items.is_empty(), "checkout empties the cart");

    // A later price change must not rewrite the purchase ledger.
    sqlx::query("UPDATE products SET price = $1 WHERE id = $2")
        .bind(999_i64)
        .bind(cheap.id)
        .execute(pool)
        .await?;

    let fetched = order_service::get_order(state, &buyer, placed.order.id)
        .await?
        .data
        .expect("order");
    let frozen = fetched
        .items
        .iter()
        .find(|item| item.product_id == cheap.id)
        .expect("ledger line");
    assert_eq!(frozen.price, 100);
    assert_eq!(fetched.order.total_price, 450);

    // Listing supports a status filter; an unknown status is a 400.
    let listed = order_service::list_orders(
        state,
        &buyer,
        OrderListQuery {
            page: Some(1),
            per_page: Some(20),
            status: Some("pending".to_string()),
            sort_order: Some(SortOrder::Desc),
        },
    )
    .await?
    .data
    .expect("orders");
    assert!(listed.items.iter().any(|o| o.id == placed.order.id));

    let err = order_service::list_orders(
        state,
        &buyer,
        OrderListQuery {
            page: None,
            per_page: None,
            status: Some("cancelled".to_string()),
            sort_order: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn category_delete_leaves_the_ledger_intact() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let pool = &state.pool;
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let (_, admin) = create_account(pool, Role::Admin).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 150, 10).await?;

    cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?;
    let placed = order_service::checkout(state, &buyer)
        .await?
        .data
        .expect("order");

    // Deleting the category cascades through the catalog and takes the
    // product with it.
    categories::delete_category(State(pool.clone()), admin, Path(category.id)).await?;
    let product_left: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
        .bind(product.id)
        .fetch_one(pool)
        .await?;
    assert!(!product_left.0, "product cascades away with its category");

    // The purchase ledger is untouched.
    let fetched = order_service::get_order(state, &buyer, placed.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(fetched.order.total_price, 300);
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].product_id, product.id);
    assert_eq!(fetched.items[0].price, 150);
    assert_eq!(fetched.items[0].quantity, 2);

    Ok(())
}

#[tokio::test]
async fn oversized_cart_view_fails_instead_of_overflowing() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, i64::MAX, 1).await?;

    let line = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?
    .data
    .expect("cart item");

    let err = cart_service::view_cart(pool, &buyer, line.cart_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg == "cart total overflow"));

    Ok(())
}

#[tokio::test]
async fn checkout_requires_a_non_empty_cart() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let pool = &state.pool;

    // No cart at all.
    let (_, newcomer) = create_account(pool, Role::Customer).await?;
    let err = order_service::checkout(state, &newcomer).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Checkout(CheckoutError::CartNotFound)
    ));

    // A cart that exists but has been emptied by a previous checkout.
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 100, 10).await?;
    cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;
    order_service::checkout(state, &buyer).await?;

    let err = order_service::checkout(state, &buyer).await.unwrap_err();
    assert!(matches!(err, AppError::Checkout(CheckoutError::EmptyCart)));

    let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(buyer.user_id)
        .fetch_one(pool)
        .await?;
    assert_eq!(orders.0, 1, "failed checkout must not create an order");

    Ok(())
}

// The trigger fires on the sentinel quantity after the order row is inserted,
// so a successful partial write would leave an order behind. Rollback must
// remove it and keep the cart intact.
#[tokio::test]
async fn failed_checkout_rolls_back_completely() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let pool = &state.pool;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION reject_sentinel_quantity() RETURNS trigger AS $fn$
        BEGIN
            IF NEW.quantity = 13 THEN
                RAISE EXCEPTION 'sentinel quantity';
            END IF;
            RETURN NEW;
        END;
        $fn$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("DROP TRIGGER IF EXISTS reject_sentinel_quantity ON order_items")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER reject_sentinel_quantity
        BEFORE INSERT ON order_items
        FOR EACH ROW EXECUTE FUNCTION reject_sentinel_quantity()
        "#,
    )
    .execute(pool)
    .await?;

    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 100, 20).await?;
    let line = cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 13,
        },
    )
    .await?
    .data
    .expect("cart item");

    let result = order_service::checkout(state, &buyer).await;

    sqlx::query("DROP TRIGGER IF EXISTS reject_sentinel_quantity ON order_items")
        .execute(pool)
        .await?;

    assert!(result.is_err());

    let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(buyer.user_id)
        .fetch_one(pool)
        .await?;
    assert_eq!(orders.0, 0, "no partial order may survive the rollback");

    let view = cart_service::view_cart(pool, &buyer, line.cart_id)
        .await?
        .data
        .expect("cart view");
    assert_eq!(view.items.len(), 1, "cart is untouched after the rollback");
    assert_eq!(view.items[0].quantity, 13);

    Ok(())
}

#[tokio::test]
async fn concurrent_checkout_produces_exactly_one_order() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let state = &ctx.state;
    let pool = &state.pool;
    let (_, buyer) = create_account(pool, Role::Customer).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 300, 10).await?;
    cart_service::add_to_cart(
        pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;

    let (left, right) = tokio::join!(
        order_service::checkout(state, &buyer),
        order_service::checkout(state, &buyer),
    );

    let successes = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "the cart can be checked out exactly once");

    let failure = if left.is_err() { left } else { right };
    assert!(matches!(
        failure.unwrap_err(),
        AppError::Checkout(CheckoutError::EmptyCart)
    ));

    let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(buyer.user_id)
        .fetch_one(pool)
        .await?;
    assert_eq!(orders.0, 1);

    Ok(())
}

#[tokio::test]
async fn status_update_notifies_the_buyer_once() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = ctx.state.pool.clone();
    let (buyer_user, buyer) = create_account(&pool, Role::Customer).await?;
    let (_, admin) = create_account(&pool, Role::Admin).await?;
    let category = seed_category(&pool).await?;
    let product = seed_product(&pool, category.id, 100, 10).await?;
    cart_service::add_to_cart(
        &pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;
    let placed = order_service::checkout(&ctx.state, &buyer)
        .await?
        .data
        .expect("order");

    // A buyer cannot drive the fulfilment workflow.
    let err = admin_service::update_order_status(
        &ctx.state,
        &buyer,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = admin_service::update_order_status(
        &ctx.state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "cancelled".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg == "Invalid order status"));

    let err = admin_service::update_order_status(
        &ctx.state,
        &admin,
        Uuid::new_v4(),
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let updated = admin_service::update_order_status(
        &ctx.state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(updated.status, OrderStatus::Shipped);

    let emails = ctx.flush_notifications().await;
    let for_order: Vec<_> = emails
        .iter()
        .filter(|e| e.order_id == placed.order.id)
        .collect();
    assert_eq!(for_order.len(), 1, "exactly one email per transition");
    assert_eq!(for_order[0].recipient, buyer_user.email);
    assert_eq!(for_order[0].status, OrderStatus::Shipped);

    Ok(())
}

#[tokio::test]
async fn failed_delivery_does_not_revert_the_status() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx_with_sink(std::sync::Arc::new(RecordingSink::failing())).await?
    else {
        return Ok(());
    };
    let pool = ctx.state.pool.clone();
    let (_, buyer) = create_account(&pool, Role::Customer).await?;
    let (_, admin) = create_account(&pool, Role::Admin).await?;
    let category = seed_category(&pool).await?;
    let product = seed_product(&pool, category.id, 100, 10).await?;
    cart_service::add_to_cart(
        &pool,
        &buyer,
        AddToCartRequest {
            product_id: product.id,
            quantity: 1,
        },
    )
    .await?;
    let placed = order_service::checkout(&ctx.state, &buyer)
        .await?
        .data
        .expect("order");

    admin_service::update_order_status(
        &ctx.state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "delivered".to_string(),
        },
    )
    .await?;

    let emails = ctx.flush_notifications().await;
    assert!(emails.iter().any(|e| e.order_id == placed.order.id));

    let (status,): (String,) = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
        .bind(placed.order.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(status, "delivered");

    Ok(())
}

#[tokio::test]
async fn logout_revokes_the_refresh_token() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;
    let (user, auth) = create_account(pool, Role::Customer).await?;

    let login = auth_service::login_user(
        pool,
        LoginRequest {
            email: user.email.clone(),
            password: TEST_PASSWORD.to_string(),
        },
    )
    .await?
    .data
    .expect("tokens");

    // The token works before logout.
    auth_service::refresh_access(
        pool,
        RefreshRequest {
            refresh: login.refresh.clone(),
        },
    )
    .await?;

    auth_service::logout_user(
        pool,
        &auth,
        LogoutRequest {
            refresh: login.refresh.clone(),
        },
    )
    .await?;

    let err = auth_service::refresh_access(
        pool,
        RefreshRequest {
            refresh: login.refresh,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    let err = auth_service::logout_user(
        pool,
        &auth,
        LogoutRequest {
            refresh: "not-a-token".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(msg) if msg == "Invalid or expired token"));

    Ok(())
}

#[tokio::test]
async fn clear_cart_is_owner_or_staff_only() -> anyhow::Result<()> {
    let Some(ctx) = common::test_ctx().await? else {
        return Ok(());
    };
    let pool = &ctx.state.pool;
    let (_, owner) = create_account(pool, Role::Customer).await?;
    let (_, stranger) = create_account(pool, Role::Customer).await?;
    let (_, admin) = create_account(pool, Role::Admin).await?;
    let category = seed_category(pool).await?;
    let product = seed_product(pool, category.id, 100, 10).await?;

    let line = cart_service::add_to_cart(
        pool,
        &owner,
        AddToCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await?
    .data
    .expect("cart item");

    // Someone else's cart reads as empty and cannot be cleared.
    let view = cart_service::view_cart(pool, &stranger, line.cart_id)
        .await?
        .data
        .expect("cart view");
    assert!(view.items.is_empty());

    let err = cart_service::clear_cart(pool, &stranger, line.cart_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // Staff may clear any cart.
    cart_service::clear_cart(pool, &admin, line.cart_id).await?;

    let err = cart_service::clear_cart(pool, &owner, line.cart_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}
