//! The catalog is owned elsewhere; playback only needs to know how many images
//! a product has so image cycling can wrap correctly.

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::ProductId;

use crate::Storage;

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// `None` when the product is unknown or its image count is not recorded.
    async fn image_count(&self, product_id: ProductId) -> Result<Option<u32>>;
}

#[async_trait]
impl ProductCatalog for Storage {
    async fn image_count(&self, product_id: ProductId) -> Result<Option<u32>> {
        let count: Option<Option<i64>> =
            sqlx::query_scalar("SELECT image_count FROM products WHERE id = ?")
                .bind(product_id.0)
                .fetch_optional(self.pool())
                .await?;
        Ok(count.flatten().and_then(|count| u32::try_from(count).ok()))
    }
}
