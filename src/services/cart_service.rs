use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartLine, CartView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct CartLineRow {
    id: Uuid,
    quantity: i32,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    category_id: Uuid,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Add a product to the caller's cart. The cart is get-or-created keyed on
/// the user (unique constraint + upsert, no check-then-insert race), and the
/// line is upserted on (cart, product): a new line takes the requested
/// quantity, an existing one is incremented by it.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::Validation(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(pool)
        .await?;
    if product_exist.is_none() {
        return Err(AppError::Validation("product not found".to_string()));
    }

    let (cart_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO carts (id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .fetch_one(pool)
    .await?;

    let cart_item: CartItem = sqlx::query_as(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (cart_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

/// List a cart's lines with per-line totals. Ownership is a filter predicate:
/// a cart id that exists but belongs to someone else yields an empty list,
/// not an error.
pub async fn view_cart(
    pool: &DbPool,
    user: &AuthUser,
    cart_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let rows = sqlx::query_as::<_, CartLineRow>(
        r#"
        SELECT ci.id, ci.quantity,
               p.id AS product_id, p.name, p.description, p.price, p.stock,
               p.category_id, p.image_url, p.created_at, p.updated_at
        FROM cart_items ci
        JOIN carts c ON c.id = ci.cart_id
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1 AND c.user_id = $2
        ORDER BY ci.created_at
        "#,
    )
    .bind(cart_id)
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let line_total = row
            .price
            .checked_mul(i64::from(row.quantity))
            .ok_or_else(|| AppError::Validation("cart total overflow".into()))?;
        items.push(CartLine {
            id: row.id,
            line_total,
            quantity: row.quantity,
            product: Product {
                id: row.product_id,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                category_id: row.category_id,
                image_url: row.image_url,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        });
    }

    Ok(ApiResponse::success(
        "OK",
        CartView { cart_id, items },
        Some(Meta::empty()),
    ))
}

/// Delete a cart and cascade its lines. Allowed for the cart's owner or
/// staff; anyone else gets a 403 without learning the cart's contents.
pub async fn clear_cart(
    pool: &DbPool,
    user: &AuthUser,
    cart_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart: Option<(Uuid, Uuid)> = sqlx::query_as("SELECT id, user_id FROM carts WHERE id = $1")
        .bind(cart_id)
        .fetch_optional(pool)
        .await?;
    let (cart_id, owner_id) = cart.ok_or(AppError::NotFound)?;

    if owner_id != user.user_id && !user.role.is_staff() {
        return Err(AppError::Forbidden);
    }

    sqlx::query("DELETE FROM carts WHERE id = $1")
        .bind(cart_id)
        .execute(pool)
        .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_clear",
        Some("carts"),
        Some(serde_json::json!({ "cart_id": cart_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        format!("Cart {cart_id} cleared"),
        serde_json::json!({ "cart_id": cart_id }),
        Some(Meta::empty()),
    ))
}
