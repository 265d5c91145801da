//! The built-in tool surface: fleet execution, capability search,
//! inspections, knowledge access, and the explicit approval request.

mod execute_api;
mod execute_command;
mod inspect;
mod list_devices;
mod read_file;
mod request_approval;
mod resolve_selector;
mod save_solution;
mod search_capabilities;
mod search_knowledge;
mod update_alias;
mod write_file;

pub use execute_api::ExecuteApiTool;
pub use execute_command::ExecuteCommandTool;
pub use inspect::InspectTool;
pub use list_devices::ListDevicesTool;
pub use read_file::ReadFileTool;
pub use request_approval::RequestApprovalTool;
pub use resolve_selector::ResolveSelectorTool;
pub use save_solution::SaveSolutionTool;
pub use search_capabilities::SearchCapabilitiesTool;
pub use search_knowledge::SearchKnowledgeTool;
pub use update_alias::UpdateAliasTool;
pub use write_file::WriteFileTool;

use crate::capability::CapabilityRegistry;
use crate::fleet::FleetEngine;
use crate::inspect::{InspectionRunner, SkillCatalog};
use crate::knowledge::KnowledgeStore;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Build the full registry from the subsystem handles. This is the one
/// explicit list the process registers at startup.
pub fn standard_registry(
    registry: Arc<CapabilityRegistry>,
    engine: Arc<FleetEngine>,
    catalog: Arc<SkillCatalog>,
    runner: Arc<InspectionRunner>,
    store: Arc<KnowledgeStore>,
) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.add(Arc::new(ListDevicesTool::new(Arc::clone(&engine))));
    tools.add(Arc::new(ResolveSelectorTool::new(
        Arc::clone(&engine),
        Arc::clone(&store),
    )));
    tools.add(Arc::new(ExecuteCommandTool::new(Arc::clone(&engine))));
    tools.add(Arc::new(ExecuteApiTool::new(Arc::clone(&engine))));
    tools.add(Arc::new(SearchCapabilitiesTool::new(registry)));
    tools.add(Arc::new(InspectTool::new(catalog, engine, runner)));
    tools.add(Arc::new(ReadFileTool::new(Arc::clone(&store))));
    tools.add(Arc::new(WriteFileTool::new(Arc::clone(&store))));
    tools.add(Arc::new(SaveSolutionTool::new(Arc::clone(&store))));
    tools.add(Arc::new(UpdateAliasTool::new(Arc::clone(&store))));
    tools.add(Arc::new(SearchKnowledgeTool::new(store)));
    tools.add(Arc::new(RequestApprovalTool));
    tools
}
