// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! View introspection commands
//!
//! `listviews`, `queryview`, `getrootview` and `getviewswithtext` answer
//! questions about the on-screen view tree through a [`ViewHierarchy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::commands::{CommandContext, CommandReturn};

const NO_ACCESSIBILITY_EVENT: &str = "No accessibility event has occured yet";
const NO_NODE: &str = "Node with given ID does not exist";
const CLASS_NOT_FOUND: &str = "Error retrieving class information";

/// Window and view ids of one accessibility node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub window: i32,
    pub view: i32,
}

impl NodeId {
    pub fn new(window: i32, view: i32) -> Self {
        Self { window, view }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.window, self.view)
    }
}

/// Screen rectangle in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewNode {
    pub id: NodeId,
    /// Resource name, e.g. `button1`
    pub view_id: Option<String>,
    pub package: String,
    pub class_name: String,
    pub text: Option<String>,
    pub password: bool,
    pub checked: bool,
    pub enabled: bool,
    pub selected: bool,
    pub focused: bool,
    pub bounds: Bounds,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl ViewNode {
    pub fn new(id: NodeId, package: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            id,
            view_id: None,
            package: package.into(),
            class_name: class_name.into(),
            text: None,
            password: false,
            checked: false,
            enabled: true,
            selected: false,
            focused: false,
            bounds: Bounds::default(),
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Select,
    ClearSelection,
    Focus,
    ClearFocus,
}

/// Access to the view tree of the active window
pub trait ViewHierarchy: Send {
    /// Root of the active window, `None` before the first accessibility event
    fn root(&self) -> Option<NodeId>;

    fn node(&self, id: NodeId) -> Option<&ViewNode>;

    fn find_by_view_id(&self, view_id: &str) -> Option<NodeId>;

    fn find_by_text(&self, text: &str) -> Vec<NodeId>;

    /// Resource id names declared by a package, `None` if unknown
    fn id_names(&self, package: &str) -> Option<Vec<String>>;

    /// Returns whether the node accepted the action
    fn perform(&mut self, id: NodeId, action: NodeAction) -> bool;
}

/// In-memory view tree
#[derive(Debug, Clone, Default)]
pub struct ViewTree {
    nodes: HashMap<NodeId, ViewNode>,
    root: Option<NodeId>,
    id_names: BTreeMap<String, Vec<String>>,
}

impl ViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, linking it under its parent if the parent is present
    pub fn insert(&mut self, node: ViewNode) {
        if let Some(parent_id) = node.parent {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                if !parent.children.contains(&node.id) {
                    parent.children.push(node.id);
                }
            }
        }
        if self.root.is_none() && node.parent.is_none() {
            self.root = Some(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub fn set_id_names(&mut self, package: impl Into<String>, names: Vec<String>) {
        self.id_names.insert(package.into(), names);
    }
}

impl ViewHierarchy for ViewTree {
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<&ViewNode> {
        self.nodes.get(&id)
    }

    fn find_by_view_id(&self, view_id: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.view_id.as_deref() == Some(view_id))
            .map(|node| node.id)
            .min()
    }

    fn find_by_text(&self, text: &str) -> Vec<NodeId> {
        let needle = text.to_lowercase();
        let mut found: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| {
                node.text
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .map(|node| node.id)
            .collect();
        found.sort();
        found
    }

    fn id_names(&self, package: &str) -> Option<Vec<String>> {
        self.id_names.get(package).cloned()
    }

    fn perform(&mut self, id: NodeId, action: NodeAction) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        if !node.enabled {
            return false;
        }
        match action {
            NodeAction::Select => node.selected = true,
            NodeAction::ClearSelection => node.selected = false,
            NodeAction::Focus => node.focused = true,
            NodeAction::ClearFocus => node.focused = false,
        }
        true
    }
}

/// `listviews`
pub fn list_views(_command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let Some(root) = ctx.views.root().and_then(|id| ctx.views.node(id)) else {
        return CommandReturn::error_with(NO_ACCESSIBILITY_EVENT);
    };
    match ctx.views.id_names(&root.package) {
        Some(names) => CommandReturn::ok_with(trailing_spaces(names)),
        None => CommandReturn::error_with(CLASS_NOT_FOUND),
    }
}

/// `queryview viewid <id> <query> [args]` or
/// `queryview accessibilityids <window> <view> <query> [args]`
pub fn query_view(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    if command.len() <= 2 {
        return CommandReturn::invalid_argument();
    }

    let (node, query, args) = match command[1].as_str() {
        "viewid" => {
            let Some(query) = command.get(3) else {
                return CommandReturn::invalid_argument();
            };
            (ctx.views.find_by_view_id(&command[2]), query, &command[4..])
        }
        "accessibilityids" => {
            if command.len() < 5 {
                return CommandReturn::invalid_argument();
            }
            let (Ok(window), Ok(view)) = (command[2].parse::<i32>(), command[3].parse::<i32>()) else {
                return CommandReturn::invalid_argument();
            };
            let id = NodeId::new(window, view);
            (ctx.views.node(id).map(|node| node.id), &command[4], &command[5..])
        }
        _ => return CommandReturn::invalid_argument(),
    };

    let Some(node) = node else {
        return CommandReturn::error_with(NO_NODE);
    };
    run_query(ctx, node, query, args)
}

fn run_query(ctx: &mut CommandContext<'_>, id: NodeId, query: &str, args: &[String]) -> CommandReturn {
    let Some(node) = ctx.views.node(id) else {
        return CommandReturn::error_with(NO_NODE);
    };

    match (query, args) {
        ("getlocation", []) => {
            let b = node.bounds;
            CommandReturn::ok_with(format!(
                "{} {} {} {}",
                b.left,
                b.top,
                b.right - b.left,
                b.bottom - b.top
            ))
        }
        ("gettext", []) => {
            if node.password {
                CommandReturn::error_with("Node contains a password")
            } else {
                CommandReturn::ok_with(node.text.clone().unwrap_or_default())
            }
        }
        ("getclass", []) => CommandReturn::ok_with(node.class_name.clone()),
        ("getchecked", []) => CommandReturn::ok_with(node.checked.to_string()),
        ("getenabled", []) => CommandReturn::ok_with(node.enabled.to_string()),
        ("getselected", []) => CommandReturn::ok_with(node.selected.to_string()),
        ("getfocused", []) => CommandReturn::ok_with(node.focused.to_string()),
        ("setselected", [value]) => {
            let action = if parse_flag(value) {
                NodeAction::Select
            } else {
                NodeAction::ClearSelection
            };
            CommandReturn::from_success(ctx.views.perform(id, action))
        }
        ("setfocused", [value]) => {
            let action = if parse_flag(value) {
                NodeAction::Focus
            } else {
                NodeAction::ClearFocus
            };
            CommandReturn::from_success(ctx.views.perform(id, action))
        }
        ("getparent", []) => match node.parent {
            Some(parent) => CommandReturn::ok_with(parent.to_string()),
            None => CommandReturn::error_with("Given node has no parent"),
        },
        ("getchildren", []) => CommandReturn::ok_with(trailing_spaces(&node.children)),
        ("getaccessibilityids", []) => CommandReturn::ok_with(node.id.to_string()),
        _ => CommandReturn::invalid_argument(),
    }
}

/// `getrootview`
pub fn get_root_view(_command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    match ctx.views.root() {
        Some(root) => run_query(ctx, root, "getaccessibilityids", &[]),
        None => CommandReturn::error_with(NO_ACCESSIBILITY_EVENT),
    }
}

/// `getviewswithtext <text>`
pub fn get_views_with_text(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    if command.len() != 2 {
        return CommandReturn::invalid_argument();
    }
    CommandReturn::ok_with(trailing_spaces(ctx.views.find_by_text(&command[1])))
}

/// Case-insensitive `true`; anything else is false
fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn trailing_spaces<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items.into_iter().map(|item| format!("{} ", item)).collect()
}
