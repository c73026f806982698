//! Brands: sender defaults and provider credentials.

use crate::error::DatabaseError;
use crate::types::{Brand, BrandId, ProviderCredentials};
use crate::{Error, Result};

use super::{BrandRow, Database, NewBrand};

impl From<BrandRow> for Brand {
    fn from(row: BrandRow) -> Self {
        Brand {
            id: BrandId(row.id),
            name: row.name,
            from_name: row.from_name,
            from_email: row.from_email,
            reply_to: row.reply_to,
            credentials: ProviderCredentials {
                access_key: row.provider_access_key,
                secret_key: row.provider_secret,
                region: row.provider_region,
            },
        }
    }
}

impl Database {
    /// Insert a brand
    pub async fn insert_brand(&self, brand: &NewBrand) -> Result<BrandId> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO brands (
                name, from_name, from_email, reply_to,
                provider_access_key, provider_secret, provider_region, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&brand.name)
        .bind(&brand.from_name)
        .bind(&brand.from_email)
        .bind(&brand.reply_to)
        .bind(&brand.credentials.access_key)
        .bind(&brand.credentials.secret_key)
        .bind(&brand.credentials.region)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert brand: {}",
                e
            )))
        })?;

        Ok(BrandId(result.last_insert_rowid()))
    }

    /// Get a brand by ID
    pub async fn get_brand(&self, id: BrandId) -> Result<Option<Brand>> {
        let row = sqlx::query_as::<_, BrandRow>(
            r#"
            SELECT id, name, from_name, from_email, reply_to,
                   provider_access_key, provider_secret, provider_region
            FROM brands WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get brand: {}",
                e
            )))
        })?;

        Ok(row.map(Brand::from))
    }
}
