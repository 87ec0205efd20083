//! Sheets tool handlers.
//!
//! Each handler validates its parameters, issues its Sheets API calls with the
//! current request's credential and shapes the reply for the model.

use super::ApiRequest;
use crate::error::ToolError;
use crate::tool_registry::{ToolContext, ToolRegistry, TOOL_CATALOG};
use rmcp::model::{CallToolResult, Content};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

/// Most ranges accepted by one batch read.
pub const MAX_RANGES_PER_BATCH_GET: usize = 100;
/// Most ranges accepted by one batch write.
pub const MAX_UPDATES_PER_BATCH: usize = 100;

const DEFAULT_SHEET_ROWS: u32 = 1000;
const DEFAULT_SHEET_COLUMNS: u32 = 26;

const BORDER_SIDES: [&str; 6] = ["top", "bottom", "left", "right", "innerHorizontal", "innerVertical"];

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MajorDimension {
    Rows,
    Columns,
}

impl MajorDimension {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rows => "ROWS",
            Self::Columns => "COLUMNS",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueRenderOption {
    FormattedValue,
    UnformattedValue,
    Formula,
}

impl ValueRenderOption {
    fn as_str(self) -> &'static str {
        match self {
            Self::FormattedValue => "FORMATTED_VALUE",
            Self::UnformattedValue => "UNFORMATTED_VALUE",
            Self::Formula => "FORMULA",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueInputOption {
    Raw,
    UserEntered,
}

impl ValueInputOption {
    fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::UserEntered => "USER_ENTERED",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsertDataOption {
    Overwrite,
    InsertRows,
}

impl InsertDataOption {
    fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "OVERWRITE",
            Self::InsertRows => "INSERT_ROWS",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeType {
    MergeAll,
    MergeColumns,
    MergeRows,
}

/// Zero-based, end-exclusive grid coordinates. Omitted bounds are unbounded.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridRange {
    #[schemars(description = "Numeric sheet id (see sheets_get_metadata)")]
    pub sheet_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_column_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column_index: Option<u32>,
}

impl GridRange {
    fn validate(&self) -> Result<(), ToolError> {
        let ordered = |start: Option<u32>, end: Option<u32>| match (start, end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        if !ordered(self.start_row_index, self.end_row_index)
            || !ordered(self.start_column_index, self.end_column_index)
        {
            return Err(ToolError::InvalidParams(
                "range start index must be lower than its end index".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetParams {
    #[schemars(description = "The ID of the spreadsheet (found in the URL after /d/)")]
    pub spreadsheet_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetValuesParams {
    #[schemars(description = "The ID of the spreadsheet (found in the URL after /d/)")]
    pub spreadsheet_id: String,
    #[schemars(description = "The A1 notation range to retrieve (e.g., \"Sheet1!A1:B10\")")]
    pub range: String,
    #[schemars(description = "The major dimension of the values (default: ROWS)")]
    pub major_dimension: Option<MajorDimension>,
    #[schemars(description = "How values should be represented (default: FORMATTED_VALUE)")]
    pub value_render_option: Option<ValueRenderOption>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetValuesParams {
    pub spreadsheet_id: String,
    #[schemars(description = "A1 notation ranges to retrieve (max 100)")]
    pub ranges: Vec<String>,
    pub major_dimension: Option<MajorDimension>,
    pub value_render_option: Option<ValueRenderOption>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValuesParams {
    pub spreadsheet_id: String,
    #[schemars(description = "The A1 notation range to update")]
    pub range: String,
    #[schemars(description = "2D array of values, one inner array per row")]
    pub values: Vec<Vec<Value>>,
    #[schemars(description = "How input is interpreted (default: USER_ENTERED)")]
    pub value_input_option: Option<ValueInputOption>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RangeValues {
    pub range: String,
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateValuesParams {
    pub spreadsheet_id: String,
    #[schemars(description = "Ranges and the values to write into each (max 100)")]
    pub data: Vec<RangeValues>,
    pub value_input_option: Option<ValueInputOption>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppendValuesParams {
    pub spreadsheet_id: String,
    #[schemars(description = "A1 range whose table the rows are appended to")]
    pub range: String,
    pub values: Vec<Vec<Value>>,
    pub value_input_option: Option<ValueInputOption>,
    #[schemars(description = "OVERWRITE or INSERT_ROWS (default: OVERWRITE)")]
    pub insert_data_option: Option<InsertDataOption>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearValuesParams {
    pub spreadsheet_id: String,
    pub range: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpreadsheetParams {
    #[schemars(description = "Title of the new spreadsheet")]
    pub title: String,
    #[schemars(description = "Titles of the sheets to create (default: one sheet)")]
    pub sheets: Option<Vec<String>>,
    pub locale: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InsertSheetParams {
    pub spreadsheet_id: String,
    #[schemars(description = "The title of the new sheet")]
    pub title: String,
    #[schemars(description = "The index where the sheet should be inserted (0-based)")]
    pub index: Option<u32>,
    #[schemars(description = "Number of rows in the sheet (default: 1000)")]
    pub row_count: Option<u32>,
    #[schemars(description = "Number of columns in the sheet (default: 26)")]
    pub column_count: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SheetParams {
    pub spreadsheet_id: String,
    #[schemars(description = "Numeric sheet id (see sheets_get_metadata)")]
    pub sheet_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteSheetsParams {
    pub spreadsheet_id: String,
    pub sheet_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSheetParams {
    pub spreadsheet_id: String,
    pub sheet_id: i64,
    pub insert_sheet_index: Option<u32>,
    pub new_sheet_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyToParams {
    pub spreadsheet_id: String,
    pub sheet_id: i64,
    #[schemars(description = "Spreadsheet that receives the copy")]
    pub destination_spreadsheet_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSheetPropertiesParams {
    pub spreadsheet_id: String,
    pub sheet_id: i64,
    pub title: Option<String>,
    pub index: Option<u32>,
    pub hidden: Option<bool>,
    pub row_count: Option<u32>,
    pub column_count: Option<u32>,
    pub frozen_row_count: Option<u32>,
    pub frozen_column_count: Option<u32>,
    #[schemars(description = "Tab color as a Color object ({red, green, blue, alpha} in 0..1)")]
    pub tab_color: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormatCellsParams {
    pub spreadsheet_id: String,
    pub range: GridRange,
    #[schemars(description = "CellFormat object; only the given top-level fields are written")]
    pub format: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormatRequest {
    pub range: GridRange,
    #[schemars(description = "CellFormat object; only the given top-level fields are written")]
    pub format: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchFormatCellsParams {
    pub spreadsheet_id: String,
    #[schemars(description = "Ranges and the format to apply to each")]
    pub format_requests: Vec<FormatRequest>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBordersParams {
    pub spreadsheet_id: String,
    pub range: GridRange,
    #[schemars(
        description = "Border objects ({style, color, width}) keyed by top, bottom, left, right, innerHorizontal or innerVertical"
    )]
    pub borders: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalFormatRule {
    pub ranges: Vec<GridRange>,
    #[schemars(description = "BooleanRule object ({condition, format})")]
    pub boolean_rule: Option<Map<String, Value>>,
    #[schemars(description = "GradientRule object ({minpoint, midpoint, maxpoint})")]
    pub gradient_rule: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddConditionalFormattingParams {
    pub spreadsheet_id: String,
    #[schemars(description = "Rules to add; each needs exactly one of booleanRule or gradientRule")]
    pub rules: Vec<ConditionalFormatRule>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergeCellsParams {
    pub spreadsheet_id: String,
    pub range: GridRange,
    #[schemars(description = "MERGE_ALL, MERGE_COLUMNS or MERGE_ROWS (default: MERGE_ALL)")]
    pub merge_type: Option<MergeType>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GridRangeParams {
    pub spreadsheet_id: String,
    pub range: GridRange,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChartParams {
    pub spreadsheet_id: String,
    #[schemars(description = "ChartSpec object, passed through unchanged")]
    pub spec: Map<String, Value>,
    #[schemars(description = "Sheet to place the chart on; omitted places it on a new sheet")]
    pub sheet_id: Option<i64>,
    pub anchor_row_index: Option<u32>,
    pub anchor_column_index: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChartParams {
    pub spreadsheet_id: String,
    #[schemars(description = "Chart id (see the charts listed by the spreadsheet)")]
    pub chart_id: i64,
    #[schemars(description = "ChartSpec fields to replace; omitted fields keep their current value")]
    pub spec: Option<Map<String, Value>>,
    #[schemars(description = "EmbeddedObjectPosition object for the chart")]
    pub position: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChartParams {
    pub spreadsheet_id: String,
    pub chart_id: i64,
}

/// Bind every catalog tool to its handler.
pub fn register_all(registry: &mut ToolRegistry) {
    for info in TOOL_CATALOG {
        match info.name {
            "sheets_check_access" => registry.register(info, check_access),
            "sheets_get_metadata" => registry.register(info, get_metadata),
            "sheets_get_values" => registry.register(info, get_values),
            "sheets_batch_get_values" => registry.register(info, batch_get_values),
            "sheets_update_values" => registry.register(info, update_values),
            "sheets_batch_update_values" => registry.register(info, batch_update_values),
            "sheets_append_values" => registry.register(info, append_values),
            "sheets_clear_values" => registry.register(info, clear_values),
            "sheets_create_spreadsheet" => registry.register(info, create_spreadsheet),
            "sheets_insert_sheet" => registry.register(info, insert_sheet),
            "sheets_delete_sheet" => registry.register(info, delete_sheet),
            "sheets_batch_delete_sheets" => registry.register(info, batch_delete_sheets),
            "sheets_duplicate_sheet" => registry.register(info, duplicate_sheet),
            "sheets_copy_to" => registry.register(info, copy_to),
            "sheets_update_sheet_properties" => {
                registry.register(info, update_sheet_properties)
            }
            "sheets_format_cells" => registry.register(info, format_cells),
            "sheets_batch_format_cells" => registry.register(info, batch_format_cells),
            "sheets_update_borders" => registry.register(info, update_borders),
            "sheets_add_conditional_formatting" => {
                registry.register(info, add_conditional_formatting)
            }
            "sheets_merge_cells" => registry.register(info, merge_cells),
            "sheets_unmerge_cells" => registry.register(info, unmerge_cells),
            "sheets_create_chart" => registry.register(info, create_chart),
            "sheets_update_chart" => registry.register(info, update_chart),
            "sheets_delete_chart" => registry.register(info, delete_chart),
            other => warn!(tool = other, "Catalog tool has no handler"),
        }
    }
}

fn json_result(value: &Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    )])
}

fn text_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(message.into())])
}

fn require(condition: bool, message: &str) -> Result<(), ToolError> {
    if condition {
        Ok(())
    } else {
        Err(ToolError::InvalidParams(message.to_string()))
    }
}

fn require_id(id: &str, what: &str) -> Result<(), ToolError> {
    require(!id.trim().is_empty(), &format!("{what} must not be empty"))
}

fn values_summary(range: Option<&Value>, values: &[Value]) -> Value {
    json!({
        "range": range,
        "rowCount": values.len(),
        "columnCount": values.first().and_then(Value::as_array).map_or(0, Vec::len),
        "values": values,
    })
}

async fn execute(ctx: &ToolContext, request: ApiRequest) -> Result<Value, ToolError> {
    let credential = ctx.request.credential()?;
    ctx.api.execute(credential, request).await
}

async fn batch_update(
    ctx: &ToolContext,
    spreadsheet_id: &str,
    requests: Vec<Value>,
) -> Result<Value, ToolError> {
    let request = ApiRequest::post(["spreadsheets".to_string(), format!("{spreadsheet_id}:batchUpdate")])
        .json(json!({ "requests": requests }));
    execute(ctx, request).await
}

#[instrument(skip(ctx))]
async fn check_access(ctx: ToolContext, p: SpreadsheetParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    let read = execute(
        &ctx,
        ApiRequest::get(["spreadsheets", p.spreadsheet_id.as_str()])
            .query("fields", "properties.title,sheets.properties.sheetId,sheets.properties.title"),
    )
    .await;

    let metadata = match read {
        Ok(metadata) => metadata,
        Err(ToolError::Api(e)) => {
            let reason = match e.status {
                Some(404) => "Spreadsheet not found. Check if the ID is correct.".to_string(),
                Some(403) => {
                    "Access denied. The spreadsheet needs to be shared with your service account."
                        .to_string()
                }
                _ => e.message.clone(),
            };
            return Ok(json_result(&json!({
                "spreadsheetId": p.spreadsheet_id,
                "permissions": { "canRead": false, "canWrite": false, "error": reason },
                "recommendation": "Share the spreadsheet with your service account email and grant appropriate permissions.",
            })));
        }
        Err(e) => return Err(e),
    };

    // A title rewrite to the current title needs editor rights but changes
    // nothing. Without a known title there is nothing safe to write.
    let title = metadata
        .pointer("/properties/title")
        .and_then(Value::as_str)
        .map(str::to_string);
    let can_write = match &title {
        Some(title) => Some(try_title_rewrite(&ctx, &p.spreadsheet_id, title).await?),
        None => {
            debug!("Spreadsheet has no title; skipping write check");
            None
        }
    };

    let sheets: Vec<Value> = metadata
        .get("sheets")
        .and_then(Value::as_array)
        .map(|sheets| {
            sheets
                .iter()
                .map(|s| {
                    json!({
                        "sheetId": s.pointer("/properties/sheetId"),
                        "title": s.pointer("/properties/title"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let recommendation = match can_write {
        Some(true) => "You have full read/write access to this spreadsheet.",
        Some(false) => {
            "You have read-only access to this spreadsheet. To write data, \
             the spreadsheet owner needs to grant you Editor permissions."
        }
        None => "You have read access to this spreadsheet. Write access could not be checked.",
    };
    Ok(json_result(&json!({
        "spreadsheetId": p.spreadsheet_id,
        "title": title,
        "permissions": { "canRead": true, "canWrite": can_write },
        "sheets": sheets,
        "recommendation": recommendation,
    })))
}

async fn try_title_rewrite(
    ctx: &ToolContext,
    spreadsheet_id: &str,
    title: &str,
) -> Result<bool, ToolError> {
    let write = batch_update(
        ctx,
        spreadsheet_id,
        vec![json!({
            "updateSpreadsheetProperties": {
                "properties": { "title": title },
                "fields": "title",
            }
        })],
    )
    .await;
    match write {
        Ok(_) => Ok(true),
        Err(ToolError::Api(e)) => {
            debug!(status = ?e.status, "Write check rejected");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(ctx))]
async fn get_metadata(ctx: ToolContext, p: SpreadsheetParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    let metadata = execute(
        &ctx,
        ApiRequest::get(["spreadsheets", p.spreadsheet_id.as_str()])
            .query("fields", "spreadsheetId,properties(title,locale,timeZone),sheets.properties"),
    )
    .await?;

    let sheets: Vec<Value> = metadata
        .get("sheets")
        .and_then(Value::as_array)
        .map(|sheets| {
            sheets
                .iter()
                .map(|s| {
                    let props = s.get("properties").cloned().unwrap_or(Value::Null);
                    json!({
                        "sheetId": props.get("sheetId"),
                        "title": props.get("title"),
                        "index": props.get("index"),
                        "rowCount": props.pointer("/gridProperties/rowCount"),
                        "columnCount": props.pointer("/gridProperties/columnCount"),
                        "tabColor": props.get("tabColor"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json_result(&json!({
        "spreadsheetId": metadata.get("spreadsheetId").cloned().unwrap_or(json!(p.spreadsheet_id)),
        "title": metadata.pointer("/properties/title"),
        "locale": metadata.pointer("/properties/locale"),
        "timeZone": metadata.pointer("/properties/timeZone"),
        "sheets": sheets,
    })))
}

#[instrument(skip(ctx))]
async fn get_values(ctx: ToolContext, p: GetValuesParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.range, "range")?;
    let response = execute(
        &ctx,
        ApiRequest::get(["spreadsheets", p.spreadsheet_id.as_str(), "values", p.range.as_str()])
            .query(
                "majorDimension",
                p.major_dimension.unwrap_or(MajorDimension::Rows).as_str(),
            )
            .query(
                "valueRenderOption",
                p.value_render_option
                    .unwrap_or(ValueRenderOption::FormattedValue)
                    .as_str(),
            ),
    )
    .await?;

    let values = response
        .get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if values.is_empty() {
        let range = response
            .get("range")
            .and_then(Value::as_str)
            .unwrap_or(&p.range);
        return Ok(text_result(format!("No data found in range: {range}")));
    }
    Ok(json_result(&values_summary(response.get("range"), &values)))
}

#[instrument(skip(ctx))]
async fn batch_get_values(
    ctx: ToolContext,
    p: BatchGetValuesParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.ranges.is_empty(), "ranges must contain at least one range")?;
    require(
        p.ranges.len() <= MAX_RANGES_PER_BATCH_GET,
        &format!("at most {MAX_RANGES_PER_BATCH_GET} ranges per request"),
    )?;

    let mut request = ApiRequest::get(["spreadsheets", p.spreadsheet_id.as_str(), "values:batchGet"])
        .query(
            "majorDimension",
            p.major_dimension.unwrap_or(MajorDimension::Rows).as_str(),
        )
        .query(
            "valueRenderOption",
            p.value_render_option
                .unwrap_or(ValueRenderOption::FormattedValue)
                .as_str(),
        );
    for range in &p.ranges {
        request = request.query("ranges", range.as_str());
    }
    let response = execute(&ctx, request).await?;

    let value_ranges: Vec<Value> = response
        .get("valueRanges")
        .and_then(Value::as_array)
        .map(|ranges| {
            ranges
                .iter()
                .map(|vr| {
                    let values = vr
                        .get("values")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    values_summary(vr.get("range"), &values)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json_result(&json!({
        "totalRanges": value_ranges.len(),
        "valueRanges": value_ranges,
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, range = %p.range))]
async fn update_values(ctx: ToolContext, p: UpdateValuesParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.range, "range")?;
    require(!p.values.is_empty(), "values must contain at least one row")?;

    let response = execute(
        &ctx,
        ApiRequest::put(["spreadsheets", p.spreadsheet_id.as_str(), "values", p.range.as_str()])
            .query(
                "valueInputOption",
                p.value_input_option
                    .unwrap_or(ValueInputOption::UserEntered)
                    .as_str(),
            )
            .json(json!({ "range": p.range, "majorDimension": "ROWS", "values": p.values })),
    )
    .await?;

    let cells = response.get("updatedCells").and_then(Value::as_u64).unwrap_or(0);
    let range = response
        .get("updatedRange")
        .and_then(Value::as_str)
        .unwrap_or(&p.range);
    Ok(text_result(format!(
        "Successfully updated {cells} cells in range: {range}"
    )))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, ranges = p.data.len()))]
async fn batch_update_values(
    ctx: ToolContext,
    p: BatchUpdateValuesParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.data.is_empty(), "data must contain at least one range")?;
    require(
        p.data.len() <= MAX_UPDATES_PER_BATCH,
        &format!("at most {MAX_UPDATES_PER_BATCH} ranges per request"),
    )?;

    let data: Vec<Value> = p
        .data
        .iter()
        .map(|d| json!({ "range": d.range, "majorDimension": "ROWS", "values": d.values }))
        .collect();
    let response = execute(
        &ctx,
        ApiRequest::post(["spreadsheets", p.spreadsheet_id.as_str(), "values:batchUpdate"]).json(
            json!({
                "valueInputOption": p.value_input_option
                    .unwrap_or(ValueInputOption::UserEntered)
                    .as_str(),
                "data": data,
            }),
        ),
    )
    .await?;

    Ok(json_result(&json!({
        "totalUpdatedSheets": response.get("totalUpdatedSheets"),
        "totalUpdatedRows": response.get("totalUpdatedRows"),
        "totalUpdatedColumns": response.get("totalUpdatedColumns"),
        "totalUpdatedCells": response.get("totalUpdatedCells"),
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, range = %p.range))]
async fn append_values(ctx: ToolContext, p: AppendValuesParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.range, "range")?;
    require(!p.values.is_empty(), "values must contain at least one row")?;

    let response = execute(
        &ctx,
        ApiRequest::post([
            "spreadsheets".to_string(),
            p.spreadsheet_id.clone(),
            "values".to_string(),
            format!("{}:append", p.range),
        ])
        .query(
            "valueInputOption",
            p.value_input_option
                .unwrap_or(ValueInputOption::UserEntered)
                .as_str(),
        )
        .query(
            "insertDataOption",
            p.insert_data_option
                .unwrap_or(InsertDataOption::Overwrite)
                .as_str(),
        )
        .json(json!({ "majorDimension": "ROWS", "values": p.values })),
    )
    .await?;

    let updates = response.get("updates").cloned().unwrap_or(Value::Null);
    Ok(text_result(format!(
        "Successfully appended {} cells to range: {}",
        updates.get("updatedCells").and_then(Value::as_u64).unwrap_or(0),
        updates
            .get("updatedRange")
            .and_then(Value::as_str)
            .unwrap_or(&p.range)
    )))
}

#[instrument(skip(ctx))]
async fn clear_values(ctx: ToolContext, p: ClearValuesParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.range, "range")?;
    let response = execute(
        &ctx,
        ApiRequest::post([
            "spreadsheets".to_string(),
            p.spreadsheet_id.clone(),
            "values".to_string(),
            format!("{}:clear", p.range),
        ])
        .json(json!({})),
    )
    .await?;

    let cleared = response
        .get("clearedRange")
        .and_then(Value::as_str)
        .unwrap_or(&p.range);
    Ok(text_result(format!("Successfully cleared range: {cleared}")))
}

#[instrument(skip(ctx))]
async fn create_spreadsheet(
    ctx: ToolContext,
    p: CreateSpreadsheetParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.title, "title")?;
    let mut properties = json!({ "title": p.title });
    if let Some(locale) = &p.locale {
        properties["locale"] = json!(locale);
    }
    if let Some(time_zone) = &p.time_zone {
        properties["timeZone"] = json!(time_zone);
    }
    let mut body = json!({ "properties": properties });
    if let Some(sheets) = p.sheets.as_ref().filter(|s| !s.is_empty()) {
        body["sheets"] = sheets
            .iter()
            .map(|title| json!({ "properties": { "title": title } }))
            .collect();
    }

    let created = execute(&ctx, ApiRequest::post(["spreadsheets"]).json(body)).await?;
    Ok(json_result(&json!({
        "message": "Spreadsheet created successfully",
        "spreadsheetId": created.get("spreadsheetId"),
        "spreadsheetUrl": created.get("spreadsheetUrl"),
        "title": created.pointer("/properties/title"),
    })))
}

#[instrument(skip(ctx))]
async fn insert_sheet(ctx: ToolContext, p: InsertSheetParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.title, "title")?;
    let mut properties = json!({
        "title": p.title,
        "gridProperties": {
            "rowCount": p.row_count.unwrap_or(DEFAULT_SHEET_ROWS),
            "columnCount": p.column_count.unwrap_or(DEFAULT_SHEET_COLUMNS),
        },
    });
    if let Some(index) = p.index {
        properties["index"] = json!(index);
    }

    let response = batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "addSheet": { "properties": properties } })],
    )
    .await?;
    let added = response.pointer("/replies/0/addSheet/properties");
    Ok(json_result(&json!({
        "message": "Sheet inserted successfully",
        "sheetId": added.and_then(|a| a.get("sheetId")),
        "title": added.and_then(|a| a.get("title")),
        "index": added.and_then(|a| a.get("index")),
    })))
}

#[instrument(skip(ctx))]
async fn delete_sheet(ctx: ToolContext, p: SheetParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "deleteSheet": { "sheetId": p.sheet_id } })],
    )
    .await?;
    Ok(text_result(format!("Sheet {} deleted successfully", p.sheet_id)))
}

#[instrument(skip(ctx))]
async fn batch_delete_sheets(
    ctx: ToolContext,
    p: BatchDeleteSheetsParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.sheet_ids.is_empty(), "sheetIds must contain at least one id")?;
    let requests = p
        .sheet_ids
        .iter()
        .map(|id| json!({ "deleteSheet": { "sheetId": id } }))
        .collect();
    batch_update(&ctx, &p.spreadsheet_id, requests).await?;
    Ok(json_result(&json!({
        "message": format!("Deleted {} sheets", p.sheet_ids.len()),
        "deletedSheetIds": p.sheet_ids,
    })))
}

#[instrument(skip(ctx))]
async fn duplicate_sheet(
    ctx: ToolContext,
    p: DuplicateSheetParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    let mut request = json!({ "sourceSheetId": p.sheet_id });
    if let Some(index) = p.insert_sheet_index {
        request["insertSheetIndex"] = json!(index);
    }
    if let Some(name) = &p.new_sheet_name {
        request["newSheetName"] = json!(name);
    }

    let response = batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "duplicateSheet": request })],
    )
    .await?;
    let props = response.pointer("/replies/0/duplicateSheet/properties");
    Ok(json_result(&json!({
        "message": "Sheet duplicated successfully",
        "sheetId": props.and_then(|a| a.get("sheetId")),
        "title": props.and_then(|a| a.get("title")),
        "index": props.and_then(|a| a.get("index")),
    })))
}

#[instrument(skip(ctx))]
async fn copy_to(ctx: ToolContext, p: CopyToParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require_id(&p.destination_spreadsheet_id, "destinationSpreadsheetId")?;
    let copied = execute(
        &ctx,
        ApiRequest::post([
            "spreadsheets".to_string(),
            p.spreadsheet_id.clone(),
            "sheets".to_string(),
            format!("{}:copyTo", p.sheet_id),
        ])
        .json(json!({ "destinationSpreadsheetId": p.destination_spreadsheet_id })),
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Sheet copied successfully",
        "destinationSpreadsheetId": p.destination_spreadsheet_id,
        "sheetId": copied.get("sheetId"),
        "title": copied.get("title"),
    })))
}

#[instrument(skip(ctx))]
async fn update_sheet_properties(
    ctx: ToolContext,
    p: UpdateSheetPropertiesParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    let mut properties = Map::new();
    let mut grid = Map::new();
    let mut fields: Vec<String> = Vec::new();

    let top_level = [
        ("title", p.title.map(Value::from)),
        ("index", p.index.map(Value::from)),
        ("hidden", p.hidden.map(Value::from)),
        ("tabColor", p.tab_color.map(Value::Object)),
    ];
    for (key, value) in top_level {
        if let Some(value) = value {
            properties.insert(key.to_string(), value);
            fields.push(key.to_string());
        }
    }
    let grid_level = [
        ("rowCount", p.row_count),
        ("columnCount", p.column_count),
        ("frozenRowCount", p.frozen_row_count),
        ("frozenColumnCount", p.frozen_column_count),
    ];
    for (key, value) in grid_level {
        if let Some(value) = value {
            grid.insert(key.to_string(), json!(value));
            fields.push(format!("gridProperties.{key}"));
        }
    }

    require(!fields.is_empty(), "at least one property to update is required")?;
    properties.insert("sheetId".to_string(), json!(p.sheet_id));
    if !grid.is_empty() {
        properties.insert("gridProperties".to_string(), Value::Object(grid));
    }
    let mask = fields.join(",");
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({
            "updateSheetProperties": { "properties": properties, "fields": mask }
        })],
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Sheet properties updated successfully",
        "sheetId": p.sheet_id,
        "updatedFields": fields,
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, sheet_id = p.range.sheet_id))]
async fn format_cells(ctx: ToolContext, p: FormatCellsParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    p.range.validate()?;
    require(!p.format.is_empty(), "format must set at least one field")?;

    let mask = format_mask(&p.format);
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![repeat_cell(&p.range, &p.format, &mask)],
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Cells formatted successfully",
        "range": p.range,
        "fields": mask,
    })))
}

fn format_mask(format: &Map<String, Value>) -> String {
    let fields: Vec<&str> = format.keys().map(String::as_str).collect();
    format!("userEnteredFormat({})", fields.join(","))
}

fn repeat_cell(range: &GridRange, format: &Map<String, Value>, mask: &str) -> Value {
    json!({
        "repeatCell": {
            "range": range,
            "cell": { "userEnteredFormat": format },
            "fields": mask,
        }
    })
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, count = p.format_requests.len()))]
async fn batch_format_cells(
    ctx: ToolContext,
    p: BatchFormatCellsParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.format_requests.is_empty(), "formatRequests must not be empty")?;
    require(
        p.format_requests.len() <= MAX_UPDATES_PER_BATCH,
        &format!("at most {MAX_UPDATES_PER_BATCH} format requests per call"),
    )?;

    let mut requests = Vec::with_capacity(p.format_requests.len());
    for (i, item) in p.format_requests.iter().enumerate() {
        item.range.validate()?;
        require(
            !item.format.is_empty(),
            &format!("formatRequests[{i}].format must set at least one field"),
        )?;
        requests.push(repeat_cell(&item.range, &item.format, &format_mask(&item.format)));
    }
    let response = batch_update(&ctx, &p.spreadsheet_id, requests).await?;
    let ranges: Vec<&GridRange> = p.format_requests.iter().map(|r| &r.range).collect();
    Ok(json_result(&json!({
        "message": format!("Formatted {} cell ranges", ranges.len()),
        "formattedRanges": ranges,
        "replies": response.get("replies").cloned().unwrap_or_else(|| json!([])),
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, sheet_id = p.range.sheet_id))]
async fn update_borders(ctx: ToolContext, p: UpdateBordersParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    p.range.validate()?;
    require(!p.borders.is_empty(), "borders must set at least one side")?;
    if let Some(side) = p.borders.keys().find(|k| !BORDER_SIDES.contains(&k.as_str())) {
        return Err(ToolError::InvalidParams(format!(
            "unknown border side '{side}', expected one of {}",
            BORDER_SIDES.join(", ")
        )));
    }

    let mut request = p.borders.clone();
    request.insert("range".to_string(), serde_json::to_value(&p.range)?);
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "updateBorders": request })],
    )
    .await?;
    let sides: Vec<&str> = p.borders.keys().map(String::as_str).collect();
    Ok(json_result(&json!({
        "message": "Borders updated successfully",
        "range": p.range,
        "sides": sides,
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, count = p.rules.len()))]
async fn add_conditional_formatting(
    ctx: ToolContext,
    p: AddConditionalFormattingParams,
) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.rules.is_empty(), "rules must not be empty")?;

    let mut requests = Vec::with_capacity(p.rules.len());
    for (i, rule) in p.rules.iter().enumerate() {
        require(!rule.ranges.is_empty(), &format!("rules[{i}].ranges must not be empty"))?;
        for range in &rule.ranges {
            range.validate()?;
        }
        let (kind, body) = match (&rule.boolean_rule, &rule.gradient_rule) {
            (Some(b), None) => ("booleanRule", b),
            (None, Some(g)) => ("gradientRule", g),
            _ => {
                return Err(ToolError::InvalidParams(format!(
                    "rules[{i}] needs exactly one of booleanRule or gradientRule"
                )))
            }
        };
        requests.push(json!({
            "addConditionalFormatRule": {
                "rule": { "ranges": rule.ranges, kind: body },
            }
        }));
    }
    batch_update(&ctx, &p.spreadsheet_id, requests).await?;
    Ok(json_result(&json!({
        "message": format!("Added {} conditional formatting rule(s)", p.rules.len()),
        "rulesAdded": p.rules.len(),
    })))
}

#[instrument(skip(ctx))]
async fn merge_cells(ctx: ToolContext, p: MergeCellsParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    p.range.validate()?;
    let merge_type = p.merge_type.unwrap_or(MergeType::MergeAll);
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "mergeCells": { "range": p.range, "mergeType": merge_type } })],
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Cells merged successfully",
        "range": p.range,
        "mergeType": merge_type,
    })))
}

#[instrument(skip(ctx))]
async fn unmerge_cells(ctx: ToolContext, p: GridRangeParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    p.range.validate()?;
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "unmergeCells": { "range": p.range } })],
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Cells unmerged successfully",
        "range": p.range,
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id))]
async fn create_chart(ctx: ToolContext, p: CreateChartParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(!p.spec.is_empty(), "spec must not be empty")?;

    let position = match p.sheet_id {
        Some(sheet_id) => json!({
            "overlayPosition": {
                "anchorCell": {
                    "sheetId": sheet_id,
                    "rowIndex": p.anchor_row_index.unwrap_or(0),
                    "columnIndex": p.anchor_column_index.unwrap_or(0),
                }
            }
        }),
        None => json!({ "newSheet": true }),
    };
    let response = batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "addChart": { "chart": { "spec": p.spec, "position": position } } })],
    )
    .await?;
    Ok(json_result(&json!({
        "message": "Chart created successfully",
        "chartId": response.pointer("/replies/0/addChart/chart/chartId"),
    })))
}

#[instrument(skip(ctx, p), fields(spreadsheet_id = %p.spreadsheet_id, chart_id = p.chart_id))]
async fn update_chart(ctx: ToolContext, p: UpdateChartParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    require(
        p.spec.is_some() || p.position.is_some(),
        "at least one of spec or position must be provided",
    )?;

    let mut requests = Vec::new();
    if let Some(changes) = &p.spec {
        require(!changes.is_empty(), "spec must set at least one field")?;
        let current = current_chart_spec(&ctx, &p.spreadsheet_id, p.chart_id).await?;
        let mut spec = current;
        for (key, value) in changes {
            spec.insert(key.clone(), value.clone());
        }
        requests.push(json!({ "updateChartSpec": { "chartId": p.chart_id, "spec": spec } }));
    }
    if let Some(position) = &p.position {
        requests.push(json!({
            "updateEmbeddedObjectPosition": {
                "objectId": p.chart_id,
                "newPosition": position,
                "fields": "*",
            }
        }));
    }
    batch_update(&ctx, &p.spreadsheet_id, requests).await?;

    let mut updated: Vec<&str> = Vec::new();
    if let Some(changes) = &p.spec {
        updated.extend(changes.keys().map(String::as_str));
    }
    if p.position.is_some() {
        updated.push("position");
    }
    Ok(json_result(&json!({
        "message": format!("Chart {} updated successfully", p.chart_id),
        "chartId": p.chart_id,
        "updatedFields": updated,
    })))
}

/// Spec of an embedded chart, looked up across every sheet.
async fn current_chart_spec(
    ctx: &ToolContext,
    spreadsheet_id: &str,
    chart_id: i64,
) -> Result<Map<String, Value>, ToolError> {
    let metadata = execute(
        ctx,
        ApiRequest::get(["spreadsheets", spreadsheet_id]).query("fields", "sheets.charts(chartId,spec)"),
    )
    .await?;
    metadata
        .get("sheets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|sheet| sheet.get("charts").and_then(Value::as_array))
        .flatten()
        .find(|chart| chart.get("chartId").and_then(Value::as_i64) == Some(chart_id))
        .and_then(|chart| chart.get("spec").and_then(Value::as_object).cloned())
        .ok_or_else(|| ToolError::InvalidParams(format!("chart {chart_id} not found in spreadsheet")))
}

#[instrument(skip(ctx))]
async fn delete_chart(ctx: ToolContext, p: DeleteChartParams) -> Result<CallToolResult, ToolError> {
    require_id(&p.spreadsheet_id, "spreadsheetId")?;
    batch_update(
        &ctx,
        &p.spreadsheet_id,
        vec![json!({ "deleteEmbeddedObject": { "objectId": p.chart_id } })],
    )
    .await?;
    Ok(text_result(format!("Chart {} deleted successfully", p.chart_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{tests::service_account_json, ServiceAccountCredential};
    use crate::context::RequestContext;
    use crate::error::ApiError;
    use crate::sheets::mock::MockSheetsApi;
    use crate::sheets::ApiMethod;
    use rmcp::model::RawContent;
    use std::sync::Arc;

    fn setup() -> (Arc<MockSheetsApi>, ToolRegistry, RequestContext) {
        let api = Arc::new(MockSheetsApi::new());
        let registry = ToolRegistry::with_sheets_tools(api.clone());
        let credential: ServiceAccountCredential =
            serde_json::from_value(service_account_json()).unwrap();
        (api, registry, RequestContext::new(credential))
    }

    fn args(value: Value) -> Option<Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn text_of(result: &CallToolResult) -> String {
        match &result.content[0].raw {
            RawContent::Text(t) => t.text.clone(),
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_values_builds_request_and_summarizes() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({
            "range": "Sheet1!A1:B2",
            "values": [["a", "b"], ["c", "d"]],
        })));

        let result = registry
            .call(
                "sheets_get_values",
                ctx,
                args(json!({ "spreadsheetId": "sheet-123", "range": "Sheet1!A1:B2" })),
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["rowCount"], json!(2));
        assert_eq!(body["columnCount"], json!(2));

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        let (email, request) = &calls[0];
        assert_eq!(email, "robot@demo-project.iam.gserviceaccount.com");
        assert_eq!(request.method, ApiMethod::Get);
        assert_eq!(
            request.segments,
            vec!["spreadsheets", "sheet-123", "values", "Sheet1!A1:B2"]
        );
        assert!(request
            .query
            .contains(&("majorDimension".to_string(), "ROWS".to_string())));
    }

    #[tokio::test]
    async fn test_get_values_empty_range() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({ "range": "Sheet1!Z1:Z9" })));
        let result = registry
            .call(
                "sheets_get_values",
                ctx,
                args(json!({ "spreadsheetId": "s", "range": "Sheet1!Z1:Z9" })),
            )
            .await
            .unwrap();
        assert_eq!(text_of(&result), "No data found in range: Sheet1!Z1:Z9");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_tool_error() {
        let api = Arc::new(MockSheetsApi::new());
        let registry = ToolRegistry::with_sheets_tools(api.clone());
        let result = registry
            .call(
                "sheets_get_metadata",
                RequestContext::anonymous(),
                args(json!({ "spreadsheetId": "s" })),
            )
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_get_limit_enforced_before_calling_api() {
        let (api, registry, ctx) = setup();
        let ranges: Vec<String> = (0..=MAX_RANGES_PER_BATCH_GET)
            .map(|i| format!("A{}", i + 1))
            .collect();
        let result = registry
            .call(
                "sheets_batch_get_values",
                ctx,
                args(json!({ "spreadsheetId": "s", "ranges": ranges })),
            )
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_append_uses_method_suffix() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({
            "updates": { "updatedCells": 4, "updatedRange": "Sheet1!A5:B6" }
        })));
        let result = registry
            .call(
                "sheets_append_values",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "range": "Sheet1!A1",
                    "values": [[1, 2], [3, 4]],
                    "insertDataOption": "INSERT_ROWS",
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            text_of(&result),
            "Successfully appended 4 cells to range: Sheet1!A5:B6"
        );
        let (_, request) = &api.calls()[0];
        assert_eq!(request.segments[3], "Sheet1!A1:append");
        assert!(request
            .query
            .contains(&("insertDataOption".to_string(), "INSERT_ROWS".to_string())));
    }

    #[tokio::test]
    async fn test_update_sheet_properties_field_mask() {
        let (api, registry, ctx) = setup();
        registry
            .call(
                "sheets_update_sheet_properties",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "sheetId": 7,
                    "title": "Renamed",
                    "frozenRowCount": 1,
                })),
            )
            .await
            .unwrap();
        let (_, request) = &api.calls()[0];
        let update = &request.body.as_ref().unwrap()["requests"][0]["updateSheetProperties"];
        assert_eq!(update["fields"], json!("title,gridProperties.frozenRowCount"));
        assert_eq!(update["properties"]["gridProperties"]["frozenRowCount"], json!(1));
        assert_eq!(update["properties"]["sheetId"], json!(7));
    }

    #[tokio::test]
    async fn test_update_sheet_properties_requires_a_field() {
        let (api, registry, ctx) = setup();
        let result = registry
            .call(
                "sheets_update_sheet_properties",
                ctx,
                args(json!({ "spreadsheetId": "s", "sheetId": 7 })),
            )
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_format_cells_mask_and_range_validation() {
        let (api, registry, ctx) = setup();
        registry
            .call(
                "sheets_format_cells",
                ctx.clone(),
                args(json!({
                    "spreadsheetId": "s",
                    "range": { "sheetId": 0, "startRowIndex": 0, "endRowIndex": 1 },
                    "format": { "textFormat": { "bold": true } },
                })),
            )
            .await
            .unwrap();
        let (_, request) = &api.calls()[0];
        let repeat = &request.body.as_ref().unwrap()["requests"][0]["repeatCell"];
        assert_eq!(repeat["fields"], json!("userEnteredFormat(textFormat)"));
        assert_eq!(repeat["range"]["endRowIndex"], json!(1));
        assert!(repeat["range"].get("startColumnIndex").is_none());

        let inverted = registry
            .call(
                "sheets_format_cells",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "range": { "sheetId": 0, "startRowIndex": 5, "endRowIndex": 2 },
                    "format": { "textFormat": { "bold": true } },
                })),
            )
            .await
            .unwrap();
        assert_eq!(inverted.is_error, Some(true));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_format_cells_one_repeat_cell_per_range() {
        let (api, registry, ctx) = setup();
        let result = registry
            .call(
                "sheets_batch_format_cells",
                ctx.clone(),
                args(json!({
                    "spreadsheetId": "s",
                    "formatRequests": [
                        {
                            "range": { "sheetId": 0, "startRowIndex": 0, "endRowIndex": 1 },
                            "format": { "textFormat": { "bold": true } },
                        },
                        {
                            "range": { "sheetId": 3 },
                            "format": { "backgroundColor": { "red": 1.0 }, "wrapStrategy": "WRAP" },
                        },
                    ],
                })),
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        assert_eq!(api.call_count(), 1);
        let (_, request) = &api.calls()[0];
        let requests = &request.body.as_ref().unwrap()["requests"];
        assert_eq!(requests.as_array().unwrap().len(), 2);
        assert_eq!(
            requests[0]["repeatCell"]["fields"],
            json!("userEnteredFormat(textFormat)")
        );
        assert_eq!(requests[1]["repeatCell"]["range"]["sheetId"], json!(3));
        assert_eq!(
            requests[1]["repeatCell"]["fields"],
            json!("userEnteredFormat(backgroundColor,wrapStrategy)")
        );

        let empty_format = registry
            .call(
                "sheets_batch_format_cells",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "formatRequests": [{ "range": { "sheetId": 0 }, "format": {} }],
                })),
            )
            .await
            .unwrap();
        assert_eq!(empty_format.is_error, Some(true));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_update_borders_sends_sides_with_range() {
        let (api, registry, ctx) = setup();
        registry
            .call(
                "sheets_update_borders",
                ctx.clone(),
                args(json!({
                    "spreadsheetId": "s",
                    "range": { "sheetId": 0, "startRowIndex": 0, "endRowIndex": 4 },
                    "borders": {
                        "top": { "style": "SOLID" },
                        "innerHorizontal": { "style": "DASHED", "color": { "blue": 1.0 } },
                    },
                })),
            )
            .await
            .unwrap();
        let (_, request) = &api.calls()[0];
        let borders = &request.body.as_ref().unwrap()["requests"][0]["updateBorders"];
        assert_eq!(borders["top"]["style"], json!("SOLID"));
        assert_eq!(borders["innerHorizontal"]["style"], json!("DASHED"));
        assert_eq!(borders["range"]["endRowIndex"], json!(4));
        assert!(borders.get("bottom").is_none());

        let unknown_side = registry
            .call(
                "sheets_update_borders",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "range": { "sheetId": 0 },
                    "borders": { "diagonal": { "style": "SOLID" } },
                })),
            )
            .await
            .unwrap();
        assert_eq!(unknown_side.is_error, Some(true));
        assert!(text_of(&unknown_side).contains("diagonal"));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_conditional_formatting_rule_kinds() {
        let (api, registry, ctx) = setup();
        let result = registry
            .call(
                "sheets_add_conditional_formatting",
                ctx.clone(),
                args(json!({
                    "spreadsheetId": "s",
                    "rules": [
                        {
                            "ranges": [{ "sheetId": 0, "startColumnIndex": 1, "endColumnIndex": 2 }],
                            "booleanRule": {
                                "condition": { "type": "NUMBER_GREATER", "values": [{ "userEnteredValue": "10" }] },
                                "format": { "textFormat": { "bold": true } },
                            },
                        },
                        {
                            "ranges": [{ "sheetId": 0 }, { "sheetId": 1 }],
                            "gradientRule": {
                                "minpoint": { "type": "MIN", "color": { "red": 1.0 } },
                                "maxpoint": { "type": "MAX", "color": { "green": 1.0 } },
                            },
                        },
                    ],
                })),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["rulesAdded"], json!(2));
        let (_, request) = &api.calls()[0];
        let requests = &request.body.as_ref().unwrap()["requests"];
        let first = &requests[0]["addConditionalFormatRule"]["rule"];
        assert_eq!(first["booleanRule"]["condition"]["type"], json!("NUMBER_GREATER"));
        assert!(first.get("gradientRule").is_none());
        let second = &requests[1]["addConditionalFormatRule"]["rule"];
        assert_eq!(second["ranges"].as_array().unwrap().len(), 2);
        assert_eq!(second["gradientRule"]["minpoint"]["type"], json!("MIN"));

        let both = registry
            .call(
                "sheets_add_conditional_formatting",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "rules": [{
                        "ranges": [{ "sheetId": 0 }],
                        "booleanRule": { "condition": { "type": "NOT_BLANK" }, "format": {} },
                        "gradientRule": { "minpoint": {}, "maxpoint": {} },
                    }],
                })),
            )
            .await
            .unwrap();
        assert_eq!(both.is_error, Some(true));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_update_chart_merges_spec_and_moves_chart() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({
            "sheets": [
                { "charts": [] },
                { "charts": [{
                    "chartId": 7,
                    "spec": { "title": "Old", "basicChart": { "chartType": "BAR" } },
                }] },
            ],
        })));
        api.respond(Ok(json!({ "replies": [{}, {}] })));
        let result = registry
            .call(
                "sheets_update_chart",
                ctx,
                args(json!({
                    "spreadsheetId": "s",
                    "chartId": 7,
                    "spec": { "title": "New" },
                    "position": { "newSheet": true },
                })),
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["updatedFields"], json!(["title", "position"]));

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        let requests = &calls[1].1.body.as_ref().unwrap()["requests"];
        let spec = &requests[0]["updateChartSpec"]["spec"];
        assert_eq!(spec["title"], json!("New"));
        assert_eq!(spec["basicChart"]["chartType"], json!("BAR"));
        assert_eq!(
            requests[1]["updateEmbeddedObjectPosition"]["newPosition"],
            json!({ "newSheet": true })
        );
    }

    #[tokio::test]
    async fn test_update_chart_unknown_chart_is_not_written() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({ "sheets": [{ "charts": [{ "chartId": 1, "spec": {} }] }] })));
        let result = registry
            .call(
                "sheets_update_chart",
                ctx.clone(),
                args(json!({ "spreadsheetId": "s", "chartId": 2, "spec": { "title": "x" } })),
            )
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("chart 2 not found"));
        assert_eq!(api.call_count(), 1);

        let nothing = registry
            .call(
                "sheets_update_chart",
                ctx,
                args(json!({ "spreadsheetId": "s", "chartId": 1 })),
            )
            .await
            .unwrap();
        assert_eq!(nothing.is_error, Some(true));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_check_access_reports_denied_read() {
        let (api, registry, ctx) = setup();
        api.respond(Err(ApiError::new(Some(403), "The caller does not have permission").into()));
        let result = registry
            .call(
                "sheets_check_access",
                ctx,
                args(json!({ "spreadsheetId": "s" })),
            )
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["permissions"]["canRead"], json!(false));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_check_access_read_only() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({
            "properties": { "title": "Budget" },
            "sheets": [{ "properties": { "sheetId": 0, "title": "Sheet1" } }],
        })));
        api.respond(Err(ApiError::new(Some(403), "read only").into()));
        let result = registry
            .call(
                "sheets_check_access",
                ctx,
                args(json!({ "spreadsheetId": "s" })),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["permissions"]["canRead"], json!(true));
        assert_eq!(body["permissions"]["canWrite"], json!(false));
        assert_eq!(body["sheets"][0]["title"], json!("Sheet1"));

        let (_, rewrite) = &api.calls()[1];
        assert_eq!(rewrite.segments, vec!["spreadsheets", "s:batchUpdate"]);
    }

    #[tokio::test]
    async fn test_check_access_without_title_skips_write_check() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({
            "sheets": [{ "properties": { "sheetId": 0, "title": "Sheet1" } }],
        })));
        let result = registry
            .call(
                "sheets_check_access",
                ctx,
                args(json!({ "spreadsheetId": "s" })),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["permissions"]["canRead"], json!(true));
        assert_eq!(body["permissions"]["canWrite"], Value::Null);
        assert_eq!(body["title"], Value::Null);
        assert_eq!(api.call_count(), 1);
        assert!(api
            .calls()
            .iter()
            .all(|(_, request)| request.segments != vec!["spreadsheets", "s:batchUpdate"]));
    }

    #[tokio::test]
    async fn test_api_error_becomes_tool_error_text() {
        let (api, registry, ctx) = setup();
        api.respond(Err(ApiError::new(Some(404), "Requested entity was not found.").into()));
        let result = registry
            .call(
                "sheets_delete_chart",
                ctx,
                args(json!({ "spreadsheetId": "s", "chartId": 42 })),
            )
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).starts_with("Error: Spreadsheet or range not found"));
    }

    #[tokio::test]
    async fn test_create_chart_on_new_sheet() {
        let (api, registry, ctx) = setup();
        api.respond(Ok(json!({ "replies": [{ "addChart": { "chart": { "chartId": 99 } } }] })));
        let result = registry
            .call(
                "sheets_create_chart",
                ctx,
                args(json!({ "spreadsheetId": "s", "spec": { "title": "Sales" } })),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(body["chartId"], json!(99));
        let (_, request) = &api.calls()[0];
        assert_eq!(
            request.body.as_ref().unwrap()["requests"][0]["addChart"]["chart"]["position"],
            json!({ "newSheet": true })
        );
    }
}
