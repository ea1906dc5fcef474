use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{
            LoginRequest, LoginResponse, LogoutRequest, ProfileResponse, RefreshRequest,
            RefreshResponse, RegisterRequest,
        },
        cart::{AddToCartRequest, CartLine, CartView},
        catalog::{
            CategoryList, CreateCategoryRequest, CreateProductRequest, ProductList,
            UpdateCategoryRequest, UpdateProductRequest,
        },
        orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    },
    models::{Cart, CartItem, Category, Order, OrderItem, OrderStatus, Product, Role, User},
    response::Meta,
    routes::{auth, cart, categories, health, orders, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::profile,
        categories::create_category,
        categories::list_categories,
        categories::get_category,
        categories::update_category,
        categories::delete_category,
        products::create_product,
        products::list_products,
        products::get_product,
        products::update_product,
        products::delete_product,
        cart::add_to_cart,
        cart::view_cart,
        cart::clear_cart,
        orders::checkout,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
    ),
    components(schemas(
        Meta,
        Role,
        OrderStatus,
        User,
        Category,
        Product,
        Cart,
        CartItem,
        Order,
        OrderItem,
        RegisterRequest,
        LoginRequest,
        LoginResponse,
        RefreshRequest,
        RefreshResponse,
        LogoutRequest,
        ProfileResponse,
        CreateCategoryRequest,
        UpdateCategoryRequest,
        CategoryList,
        CreateProductRequest,
        UpdateProductRequest,
        ProductList,
        AddToCartRequest,
        CartLine,
        CartView,
        UpdateOrderStatusRequest,
        OrderWithItems,
        OrderList,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness probe"),
        (name = "Auth", description = "Registration, login and token lifecycle"),
        (name = "Categories", description = "Category management (staff only)"),
        (name = "Products", description = "Product catalog"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Orders", description = "Checkout and order tracking"),
    )
)]
pub struct ApiDoc;

/// Interactive API reference served at `/docs`.
pub fn scalar_docs() -> Scalar<openapi::OpenApi> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
