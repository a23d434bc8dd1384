//! Default tool registry
//!
//! Each tool forwards its arguments to the matching plugin endpoint.

use crate::tools::{ForwardTool, ToolRegistry};

/// (tool name, plugin endpoint, description)
const FORWARDED_TOOLS: &[(&str, &str, &str)] = &[
    ("get_file_tree", "/api/file-tree", "Get the instance hierarchy as a file tree"),
    ("search_files", "/api/search-files", "Search scripts and instances by name or content"),
    ("get_place_info", "/api/place-info", "Get information about the open place"),
    ("get_services", "/api/services", "List top-level services"),
    ("search_objects", "/api/search-objects", "Find instances by name, class or property"),
    ("get_instance_properties", "/api/instance-properties", "Read the properties of an instance"),
    ("get_instance_children", "/api/instance-children", "List the children of an instance"),
    ("get_class_info", "/api/class-info", "Describe the properties and methods of a class"),
    ("get_project_structure", "/api/project-structure", "Get an overview of the project layout"),
    ("set_property", "/api/set-property", "Set a property on an instance"),
];

/// Build the registry with every forwarding tool registered
pub fn build_registry() -> ToolRegistry {
    FORWARDED_TOOLS
        .iter()
        .fold(ToolRegistry::new(), |registry, (name, endpoint, description)| {
            registry.register(ForwardTool::new(*name, *endpoint).with_description(*description))
        })
}
