//! Google Sheets MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server that exposes
//! Google Sheets operations as tools over streamable HTTP. One process serves
//! many clients; each client gets its own session.
//!
//! # Architecture
//!
//! - **Origin check / auth gate** (`server::OriginCheckService`,
//!   `auth::AuthGateService`): tower services in front of the dispatcher. The
//!   gate decodes the service account key from `Authorization: Bearer` on every
//!   request and attaches it to the request as a [`RequestContext`].
//!
//! - **Dispatcher** (`server::McpHttpService`): routes POST/GET/DELETE on the
//!   MCP path by `mcp-session-id`, creating sessions on `initialize`.
//!
//! - **Sessions** (`session`): the session table, the per-session protocol
//!   transport and the reaper task that evicts idle and deleted sessions.
//!
//! - **Tools** (`tool_registry`, `sheets`): a static catalog bound to async
//!   handlers. Each handler makes one Sheets API call with the credential of
//!   the request that invoked it.
//!
//! # Tools
//!
//! ## Access
//! - `sheets_check_access`: Report read/write permissions on a spreadsheet
//! - `sheets_get_metadata`: Title, locale and sheet list
//!
//! ## Values
//! - `sheets_get_values` / `sheets_batch_get_values`
//! - `sheets_update_values` / `sheets_batch_update_values`
//! - `sheets_append_values`, `sheets_clear_values`
//!
//! ## Sheets
//! - `sheets_create_spreadsheet`, `sheets_insert_sheet`, `sheets_delete_sheet`,
//!   `sheets_batch_delete_sheets`, `sheets_duplicate_sheet`, `sheets_copy_to`,
//!   `sheets_update_sheet_properties`
//!
//! ## Formatting and charts
//! - `sheets_format_cells`, `sheets_batch_format_cells`, `sheets_update_borders`,
//!   `sheets_add_conditional_formatting`, `sheets_merge_cells`,
//!   `sheets_unmerge_cells`
//! - `sheets_create_chart`, `sheets_update_chart`, `sheets_delete_chart`

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sheets;
pub mod tool_registry;

pub use auth::{AuthError, AuthGateService, ServiceAccountCredential};
pub use config::ServerConfig;
pub use context::RequestContext;
pub use error::{ApiError, ToolError};
pub use server::{build_service, HttpStack, McpHttpService, OriginCheckService};
pub use session::{spawn_reaper, SessionStore};
pub use sheets::{GoogleSheetsClient, SheetsApi};
pub use tool_registry::{ToolCategory, ToolInfo, ToolRegistry, TOOL_CATALOG};
