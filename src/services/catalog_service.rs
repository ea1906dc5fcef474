use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, AppResult},
};

/// Which catalog table a name-uniqueness check runs against.
#[derive(Debug, Clone, Copy)]
pub enum CatalogKind {
    Category,
    Product,
}

impl CatalogKind {
    fn noun(&self) -> &'static str {
        match self {
            CatalogKind::Category => "Category",
            CatalogKind::Product => "Product",
        }
    }
}

/// Case-insensitive name uniqueness, excluding the record being updated so a
/// record may keep (or re-case) its own name. Backstopped by the
/// `LOWER(name)` unique indexes.
pub async fn ensure_unique_name(
    pool: &DbPool,
    kind: CatalogKind,
    name: &str,
    exclude: Option<Uuid>,
) -> AppResult<()> {
    let query = match kind {
        CatalogKind::Category => {
            "SELECT EXISTS(SELECT 1 FROM categories WHERE LOWER(name) = LOWER($1) AND id IS DISTINCT FROM $2)"
        }
        CatalogKind::Product => {
            "SELECT EXISTS(SELECT 1 FROM products WHERE LOWER(name) = LOWER($1) AND id IS DISTINCT FROM $2)"
        }
    };

    let taken: (bool,) = sqlx::query_as(query)
        .bind(name)
        .bind(exclude)
        .fetch_one(pool)
        .await?;

    if taken.0 {
        return Err(AppError::Validation(format!(
            "{} with this name already exists.",
            kind.noun()
        )));
    }
    Ok(())
}

pub async fn ensure_category_exists(pool: &DbPool, category_id: Uuid) -> AppResult<()> {
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM categories WHERE id = $1)")
        .bind(category_id)
        .fetch_one(pool)
        .await?;
    if !exists.0 {
        return Err(AppError::Validation("category not found".into()));
    }
    Ok(())
}
