//! Products module ("products-server").
//!
//! Catalog CRUD over the products table plus category/price statistics.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::stats::{average, count_by};
use crate::gateway::context::ToolContext;
use crate::gateway::protocol::{GatewayError, PromptArgument, PromptDefinition, ResourceContent};
use crate::gateway::registry::{
    ModuleRegistry, ResourceBuilder, ResourceResult, ToolBuilder, ToolReply, ToolResult,
};
use crate::store::{DataStore, Filter, Row};

pub const SERVER_NAME: &str = "products-server";

pub fn build_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new(SERVER_NAME);

    registry.register_tool(get_products_tool());
    registry.register_tool(create_product_tool());
    registry.register_tool(update_product_tool());
    registry.register_tool(delete_product_tool());
    registry.register_tool(get_product_statistics_tool());

    registry.register_resource(
        ResourceBuilder::new("products://all", "All Products")
            .description("Every product, unfiltered")
            .mime_type("application/json")
            .build(all_products_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("products://in-stock", "In-Stock Products")
            .description("Products with stock on hand")
            .mime_type("application/json")
            .build(in_stock_products_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("products://statistics", "Product Statistics")
            .description("Grouped product counts by category plus price aggregates")
            .mime_type("application/json")
            .build(statistics_handler),
    );
    registry.set_fallback_resource(std::sync::Arc::new(|ctx, uri| {
        Box::pin(all_products_handler(ctx, uri))
    }));

    registry.register_prompt(PromptDefinition {
        name: "restock_report".to_string(),
        description: "Summarize which products are out of stock or running low".to_string(),
        arguments: vec![PromptArgument {
            name: "category".to_string(),
            description: "Restrict the report to one category".to_string(),
            required: false,
        }],
    });

    registry
}

fn public_row(mut row: Row) -> Value {
    row.remove("id");
    Value::Object(row)
}

fn fetch_product(store: &dyn DataStore, product_id: &str) -> Result<Row, GatewayError> {
    let mut rows = store.select("products", &[Filter::eq("product_id", product_id)])?;
    if rows.is_empty() {
        return Err(GatewayError::NotFound(format!("Product: {}", product_id)));
    }
    Ok(rows.remove(0))
}

// ============================================================================
// get_products
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetProductsParams {
    #[serde(default)]
    category: Option<String>,
}

fn get_products_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_products")
        .description("List products, optionally filtered by category")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "category": {
                    "type": "string",
                    "description": "Only return products in this category"
                }
            },
            "required": ["agent_id"]
        }))
        .build(get_products_handler)
}

async fn get_products_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: GetProductsParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let filters = match &params.category {
        Some(category) => vec![Filter::eq("category", category.as_str())],
        None => Vec::new(),
    };
    let rows = ctx.data_store.select("products", &filters)?;
    let count = rows.len();
    let products: Vec<Value> = rows.into_iter().map(public_row).collect();

    Ok(ToolReply::new(
        json!({ "products": products, "count": count }),
        json!({ "count": count, "category_filter": params.category }),
    ))
}

// ============================================================================
// create_product
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateProductParams {
    name: String,
    price: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    stock: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

fn create_product_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("create_product")
        .description("Create a product")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "name": { "type": "string" },
                "price": {
                    "type": "number",
                    "description": "Unit price; must not be negative"
                },
                "category": { "type": "string" },
                "sku": { "type": "string" },
                "stock": {
                    "type": "integer",
                    "description": "Units on hand (defaults to 0)"
                },
                "description": { "type": "string" }
            },
            "required": ["agent_id", "name", "price"]
        }))
        .build(create_product_handler)
}

async fn create_product_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: CreateProductParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    if params.price < 0.0 {
        return Err(GatewayError::Validation(format!(
            "Price must not be negative, got {}",
            params.price
        )));
    }

    let store = ctx.data_store.as_ref();
    let product_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut row = Row::new();
    row.insert("product_id".to_string(), json!(product_id));
    row.insert("name".to_string(), json!(params.name));
    row.insert("category".to_string(), json!(params.category));
    row.insert("sku".to_string(), json!(params.sku));
    row.insert("price".to_string(), json!(params.price));
    row.insert("stock".to_string(), json!(params.stock.unwrap_or(0)));
    row.insert("description".to_string(), json!(params.description));
    row.insert("created_at".to_string(), json!(now));
    row.insert("updated_at".to_string(), json!(now));
    store.insert("products", &row)?;

    let created = fetch_product(store, &product_id)?;

    Ok(ToolReply::new(
        json!({ "product": public_row(created) }),
        json!({ "product_id": product_id, "name": params.name }),
    ))
}

// ============================================================================
// update_product
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdateProductParams {
    product_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    stock: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

fn update_product_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("update_product")
        .description("Update a product's fields")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "product_id": {
                    "type": "string",
                    "description": "Business identifier of the product"
                },
                "name": { "type": "string" },
                "category": { "type": "string" },
                "sku": { "type": "string" },
                "price": { "type": "number" },
                "stock": { "type": "integer" },
                "description": { "type": "string" }
            },
            "required": ["agent_id", "product_id"]
        }))
        .build(update_product_handler)
}

async fn update_product_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: UpdateProductParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    fetch_product(store, &params.product_id)?;

    if let Some(price) = params.price {
        if price < 0.0 {
            return Err(GatewayError::Validation(format!(
                "Price must not be negative, got {}",
                price
            )));
        }
    }

    let mut changes = Row::new();
    if let Some(name) = params.name {
        changes.insert("name".to_string(), json!(name));
    }
    if let Some(category) = params.category {
        changes.insert("category".to_string(), json!(category));
    }
    if let Some(sku) = params.sku {
        changes.insert("sku".to_string(), json!(sku));
    }
    if let Some(price) = params.price {
        changes.insert("price".to_string(), json!(price));
    }
    if let Some(stock) = params.stock {
        changes.insert("stock".to_string(), json!(stock));
    }
    if let Some(description) = params.description {
        changes.insert("description".to_string(), json!(description));
    }

    if changes.is_empty() {
        return Err(GatewayError::InvalidParams(
            "No fields to update".to_string(),
        ));
    }

    let touched: Vec<String> = changes.keys().cloned().collect();
    changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    store.update(
        "products",
        &[Filter::eq("product_id", params.product_id.as_str())],
        &changes,
    )?;

    let updated = fetch_product(store, &params.product_id)?;

    Ok(ToolReply::new(
        json!({ "product": public_row(updated) }),
        json!({ "product_id": params.product_id, "fields": touched }),
    ))
}

// ============================================================================
// delete_product
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeleteProductParams {
    product_id: String,
}

fn delete_product_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("delete_product")
        .description("Delete a product by its business identifier")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "product_id": {
                    "type": "string",
                    "description": "Business identifier of the product to delete"
                }
            },
            "required": ["agent_id", "product_id"]
        }))
        .build(delete_product_handler)
}

async fn delete_product_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: DeleteProductParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    fetch_product(store, &params.product_id)?;
    let deleted = store.delete(
        "products",
        &[Filter::eq("product_id", params.product_id.as_str())],
    )?;

    Ok(ToolReply::new(
        json!({ "success": true, "product_id": params.product_id }),
        json!({ "product_id": params.product_id, "deleted": deleted }),
    ))
}

// ============================================================================
// get_product_statistics
// ============================================================================

fn get_product_statistics_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_product_statistics")
        .description("Grouped product counts by category plus price aggregates")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                }
            },
            "required": ["agent_id"]
        }))
        .build(get_product_statistics_handler)
}

fn product_statistics(rows: &[Row]) -> Value {
    let in_stock = rows
        .iter()
        .filter(|row| row.get("stock").and_then(Value::as_i64).unwrap_or(0) > 0)
        .count();
    json!({
        "total": rows.len(),
        "by_category": count_by(rows, "category"),
        "average_price": average(rows, "price"),
        "in_stock": in_stock,
    })
}

async fn get_product_statistics_handler(ctx: ToolContext, _params: Value) -> ToolResult {
    let rows = ctx.data_store.select("products", &[])?;
    let statistics = product_statistics(&rows);

    Ok(ToolReply::new(statistics, json!({ "total": rows.len() })))
}

// ============================================================================
// Resources
// ============================================================================

fn rows_to_resource(uri: String, payload: Value) -> Vec<ResourceContent> {
    vec![ResourceContent::Text {
        uri,
        mime_type: Some("application/json".to_string()),
        text: serde_json::to_string_pretty(&payload).unwrap_or_default(),
    }]
}

async fn all_products_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("products", &[])?;
    let count = rows.len();
    let products: Vec<Value> = rows.into_iter().map(public_row).collect();
    Ok(rows_to_resource(
        uri,
        json!({ "products": products, "count": count }),
    ))
}

async fn in_stock_products_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("products", &[])?;
    let products: Vec<Value> = rows
        .into_iter()
        .filter(|row| row.get("stock").and_then(Value::as_i64).unwrap_or(0) > 0)
        .map(public_row)
        .collect();
    let count = products.len();
    Ok(rows_to_resource(
        uri,
        json!({ "products": products, "count": count }),
    ))
}

async fn statistics_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("products", &[])?;
    Ok(rows_to_resource(uri, product_statistics(&rows)))
}
