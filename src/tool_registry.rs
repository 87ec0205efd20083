//! Tool registry.
//!
//! `TOOL_CATALOG` is the static list of tools with their user-facing
//! descriptions. `ToolRegistry` binds each catalog entry to an input schema
//! and an async handler at startup; it is immutable once the server runs and
//! is shared by every session.

use crate::context::RequestContext;
use crate::error::ToolError;
use crate::sheets::SheetsApi;
use rmcp::model::{CallToolResult, JsonObject, Tool};
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Access checks and spreadsheet metadata
    Access,
    /// Reading and writing cell values
    Values,
    /// Creating, copying and deleting spreadsheets and sheets
    Sheets,
    /// Cell formatting and merges
    Formatting,
    /// Embedded charts
    Charts,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Values => "values",
            Self::Sheets => "sheets",
            Self::Formatting => "formatting",
            Self::Charts => "charts",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[
            Self::Access,
            Self::Values,
            Self::Sheets,
            Self::Formatting,
            Self::Charts,
        ]
    }
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub category: ToolCategory,
    pub description: &'static str,
}

/// Static catalog of all tools
pub static TOOL_CATALOG: &[ToolInfo] = &[
    ToolInfo {
        name: "sheets_check_access",
        category: ToolCategory::Access,
        description: "Check access permissions for a spreadsheet. \
                      Returns information about what operations are allowed.",
    },
    ToolInfo {
        name: "sheets_get_metadata",
        category: ToolCategory::Access,
        description: "Get spreadsheet metadata: title, locale, time zone and the list of sheets \
                      with their ids and grid sizes.",
    },
    ToolInfo {
        name: "sheets_get_values",
        category: ToolCategory::Values,
        description: "Get values from a specified range in a Google Sheets spreadsheet",
    },
    ToolInfo {
        name: "sheets_batch_get_values",
        category: ToolCategory::Values,
        description: "Get values from multiple ranges in a single request (max 100 ranges)",
    },
    ToolInfo {
        name: "sheets_update_values",
        category: ToolCategory::Values,
        description: "Update values in a specified range. Values are a 2D array of rows.",
    },
    ToolInfo {
        name: "sheets_batch_update_values",
        category: ToolCategory::Values,
        description: "Update values in multiple ranges in a single request (max 100 ranges)",
    },
    ToolInfo {
        name: "sheets_append_values",
        category: ToolCategory::Values,
        description: "Append rows after the last row of data in a range",
    },
    ToolInfo {
        name: "sheets_clear_values",
        category: ToolCategory::Values,
        description: "Clear values from a range, keeping formatting",
    },
    ToolInfo {
        name: "sheets_create_spreadsheet",
        category: ToolCategory::Sheets,
        description: "Create a new spreadsheet, optionally with named sheets",
    },
    ToolInfo {
        name: "sheets_insert_sheet",
        category: ToolCategory::Sheets,
        description: "Add a new sheet to an existing Google Sheets spreadsheet",
    },
    ToolInfo {
        name: "sheets_delete_sheet",
        category: ToolCategory::Sheets,
        description: "Delete a sheet from a spreadsheet by sheet id",
    },
    ToolInfo {
        name: "sheets_batch_delete_sheets",
        category: ToolCategory::Sheets,
        description: "Delete several sheets from a spreadsheet in one request",
    },
    ToolInfo {
        name: "sheets_duplicate_sheet",
        category: ToolCategory::Sheets,
        description: "Duplicate a sheet within the same spreadsheet",
    },
    ToolInfo {
        name: "sheets_copy_to",
        category: ToolCategory::Sheets,
        description: "Copy a sheet to another spreadsheet",
    },
    ToolInfo {
        name: "sheets_update_sheet_properties",
        category: ToolCategory::Sheets,
        description: "Rename, reorder, hide, resize or recolor a sheet",
    },
    ToolInfo {
        name: "sheets_format_cells",
        category: ToolCategory::Formatting,
        description: "Apply a cell format (CellFormat object) to a grid range",
    },
    ToolInfo {
        name: "sheets_batch_format_cells",
        category: ToolCategory::Formatting,
        description: "Apply several cell formats to several grid ranges in one batch update",
    },
    ToolInfo {
        name: "sheets_update_borders",
        category: ToolCategory::Formatting,
        description: "Set the top, bottom, left, right or inner borders of a grid range",
    },
    ToolInfo {
        name: "sheets_add_conditional_formatting",
        category: ToolCategory::Formatting,
        description: "Add boolean or gradient conditional format rules over grid ranges",
    },
    ToolInfo {
        name: "sheets_merge_cells",
        category: ToolCategory::Formatting,
        description: "Merge the cells of a grid range",
    },
    ToolInfo {
        name: "sheets_unmerge_cells",
        category: ToolCategory::Formatting,
        description: "Unmerge all merged cells inside a grid range",
    },
    ToolInfo {
        name: "sheets_create_chart",
        category: ToolCategory::Charts,
        description: "Create an embedded chart from a ChartSpec object",
    },
    ToolInfo {
        name: "sheets_update_chart",
        category: ToolCategory::Charts,
        description: "Update the spec fields or the position of an existing chart",
    },
    ToolInfo {
        name: "sheets_delete_chart",
        category: ToolCategory::Charts,
        description: "Delete an embedded chart by chart id",
    },
];

pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_CATALOG.iter().find(|t| t.name == name)
}

pub fn tools_in(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_CATALOG.iter().filter(move |t| t.category == category)
}

/// Server instructions sent in the initialize result.
pub fn instructions() -> String {
    let mut out = String::from(
        "Google Sheets server. Every request must carry a service account key \
         (Authorization: Bearer <base64 JSON>) and the spreadsheet must be shared \
         with that service account.\n\
         Start with sheets_check_access or sheets_get_metadata to learn sheet ids.\n\nTools:",
    );
    for category in ToolCategory::all() {
        let names: Vec<&str> = tools_in(*category).map(|t| t.name).collect();
        out.push_str(&format!("\n- {}: {}", category.as_str(), names.join(", ")));
    }
    out
}

/// Everything a handler may use while serving one call.
#[derive(Clone)]
pub struct ToolContext {
    pub request: RequestContext,
    pub api: Arc<dyn SheetsApi>,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<CallToolResult, ToolError>> + Send>>;
type ToolHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;

struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

pub struct ToolRegistry {
    api: Arc<dyn SheetsApi>,
    tools: Vec<RegisteredTool>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Empty registry whose handlers will talk to `api`.
    pub fn new(api: Arc<dyn SheetsApi>) -> Self {
        Self {
            api,
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry with every catalog tool bound to its handler.
    pub fn with_sheets_tools(api: Arc<dyn SheetsApi>) -> Self {
        let mut registry = Self::new(api);
        crate::sheets::tools::register_all(&mut registry);
        registry
    }

    /// Bind `handler` to the catalog entry `info`. The input schema is derived
    /// from `P`; arguments that do not deserialize into `P` are reported as a
    /// tool error without calling the handler.
    pub fn register<P, F, Fut>(&mut self, info: &'static ToolInfo, handler: F)
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(ToolContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ToolError>> + Send + 'static,
    {
        let tool = Tool::new(info.name, info.description, Arc::new(input_schema::<P>()));
        let handler = Arc::new(handler);
        let erased: ToolHandler = Arc::new(move |ctx: ToolContext, args: Value| {
            let handler = handler.clone();
            Box::pin(async move {
                let params: P = serde_json::from_value(args)?;
                handler(ctx, params).await
            }) as ToolFuture
        });

        if let Some(&slot) = self.index.get(info.name) {
            warn!(tool = info.name, "Replacing previously registered tool");
            self.tools[slot] = RegisteredTool {
                tool,
                handler: erased,
            };
        } else {
            self.index.insert(info.name, self.tools.len());
            self.tools.push(RegisteredTool {
                tool,
                handler: erased,
            });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for `tools/list`, in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    /// Run a tool. Returns `None` when no tool of that name is registered;
    /// handler failures are folded into an `is_error` result.
    pub async fn call(
        &self,
        name: &str,
        request: RequestContext,
        arguments: Option<Map<String, Value>>,
    ) -> Option<CallToolResult> {
        let slot = *self.index.get(name)?;
        let handler = self.tools[slot].handler.clone();
        let ctx = ToolContext {
            request,
            api: self.api.clone(),
        };
        let args = Value::Object(arguments.unwrap_or_default());

        debug!(tool = name, request_id = %ctx.request.request_id(), "Calling tool");
        Some(match handler(ctx, args).await {
            Ok(result) => result,
            Err(e) => {
                debug!(tool = name, error = %e, "Tool returned an error");
                e.to_tool_result()
            }
        })
    }
}

fn input_schema<P: JsonSchema>() -> JsonObject {
    match serde_json::to_value(schema_for!(P)) {
        Ok(Value::Object(mut map)) => {
            map.remove("$schema");
            map
        }
        _ => {
            let mut map = JsonObject::new();
            map.insert("type".to_string(), Value::String("object".to_string()));
            map
        }
    }
}
