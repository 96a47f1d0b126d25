//! Model collection scene files.
//!
//! A scene is a flat list of XML nodes under an `<MRML>` root. Nodes refer to
//! each other by id through `*Ref` attributes. Models are registered as a
//! model node plus storage and display nodes, placed in a hierarchy either
//! flat under a root hierarchy node or under the matching node of an
//! imported hierarchy template.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use tracing::{debug, info, warn};

use crate::error::{ModelError, ModelResult};
use crate::tracing_ext::log_io_operation;

/// Scene format version written on new scenes.
pub const SCENE_VERSION: &str = "Slicer4";

/// What a scene node is, resolved from its element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Hierarchy,
    Model,
    Storage,
    Display,
    /// Color table nodes only live in the scene while models are built.
    ColorTable,
    ColorTableStorage,
    /// Anything else, kept as read.
    Other,
}

impl NodeKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "ModelHierarchy" => NodeKind::Hierarchy,
            "Model" => NodeKind::Model,
            "ModelStorage" => NodeKind::Storage,
            "ModelDisplay" => NodeKind::Display,
            "ColorTable" => NodeKind::ColorTable,
            "ColorTableStorage" => NodeKind::ColorTableStorage,
            _ => NodeKind::Other,
        }
    }

    /// Element name for new nodes.
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::Hierarchy => "ModelHierarchy",
            NodeKind::Model => "Model",
            NodeKind::Storage => "ModelStorage",
            NodeKind::Display => "ModelDisplay",
            NodeKind::ColorTable => "ColorTable",
            NodeKind::ColorTableStorage => "ColorTableStorage",
            NodeKind::Other => "Node",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            NodeKind::Hierarchy => "vtkMRMLModelHierarchyNode",
            NodeKind::Model => "vtkMRMLModelNode",
            NodeKind::Storage => "vtkMRMLModelStorageNode",
            NodeKind::Display => "vtkMRMLModelDisplayNode",
            NodeKind::ColorTable => "vtkMRMLColorTableNode",
            NodeKind::ColorTableStorage => "vtkMRMLColorTableStorageNode",
            NodeKind::Other => "vtkMRMLNode",
        }
    }
}

/// One scene element with its attributes in file order.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub kind: NodeKind,
    tag: String,
    attributes: Vec<(String, String)>,
    /// Nested content, replayed verbatim on write.
    content: Vec<Event<'static>>,
}

impl SceneNode {
    /// A new node of `kind` without an id.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            tag: kind.tag().to_string(),
            attributes: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, keeping its position when it already exists.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn id(&self) -> &str {
        self.get("id").unwrap_or("")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn parent(&self) -> Option<&str> {
        self.get("parentNodeRef").filter(|p| !p.is_empty())
    }

    pub fn associated(&self) -> Option<&str> {
        self.get("associatedNodeRef").filter(|a| !a.is_empty())
    }
}

/// An in-memory scene bound to the file it commits to.
#[derive(Debug, Clone)]
pub struct Scene {
    path: PathBuf,
    root_attributes: Vec<(String, String)>,
    nodes: Vec<SceneNode>,
}

impl Scene {
    /// An empty scene that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            root_attributes: vec![("version".to_string(), SCENE_VERSION.to_string())],
            nodes: Vec::new(),
        }
    }

    /// Read a scene file.
    pub fn load(path: &Path) -> ModelResult<Self> {
        let xml = std::fs::read_to_string(path);
        log_io_operation("read", path, xml.is_ok());
        let xml = xml.map_err(|e| ModelError::io_read(path, e))?;
        Self::parse(&xml, path)
    }

    /// Parse scene XML. `path` becomes the commit target.
    pub fn parse(xml: &str, path: &Path) -> ModelResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut scene = Scene::new(path);
        let mut seen_root = false;
        let parse_err = |reader: &Reader<&[u8]>, e: quick_xml::Error| {
            ModelError::parse(
                path,
                format!("{} at byte {}", e, reader.buffer_position()),
            )
        };

        loop {
            match reader.read_event().map_err(|e| parse_err(&reader, e))? {
                Event::Start(e) if !seen_root => {
                    if e.name().as_ref() != b"MRML" {
                        return Err(ModelError::parse(path, "root element is not MRML"));
                    }
                    seen_root = true;
                    scene.root_attributes = read_attributes(&e, path)?;
                }
                Event::Empty(e) if !seen_root => {
                    if e.name().as_ref() != b"MRML" {
                        return Err(ModelError::parse(path, "root element is not MRML"));
                    }
                    seen_root = true;
                    scene.root_attributes = read_attributes(&e, path)?;
                }
                Event::Empty(e) => {
                    scene.nodes.push(node_from_start(&e, path)?);
                }
                Event::Start(e) => {
                    let mut node = node_from_start(&e, path)?;
                    let mut depth = 1usize;
                    loop {
                        let event = reader.read_event().map_err(|e| parse_err(&reader, e))?;
                        match &event {
                            Event::Start(_) => depth += 1,
                            Event::End(_) => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Event::Eof => {
                                return Err(ModelError::parse(path, "unterminated scene node"));
                            }
                            _ => {}
                        }
                        node.content.push(event.into_owned());
                    }
                    scene.nodes.push(node);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(ModelError::parse(path, "no MRML element"));
        }
        debug!(nodes = scene.nodes.len(), path = %path.display(), "Parsed scene");
        Ok(scene)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut SceneNode> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    /// First node whose `name` attribute equals `name`.
    pub fn first_node_by_name(&self, name: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|n| n.name() == Some(name))
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &SceneNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Ids of the nodes whose parent is `id`.
    pub fn children(&self, id: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.parent() == Some(id))
            .map(|n| n.id().to_string())
            .collect()
    }

    /// Ids of every node below `id`, depth first.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = self.children(id);
        while let Some(child) = stack.pop() {
            stack.extend(self.children(&child));
            out.push(child);
        }
        out
    }

    fn unique_id(&self, kind: NodeKind) -> String {
        let prefix = kind.id_prefix();
        (1..)
            .map(|n| format!("{}{}", prefix, n))
            .find(|id| self.node(id).is_none())
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Add a node, giving it a fresh id when it has none or a taken one.
    /// Returns the id.
    pub fn add_node(&mut self, mut node: SceneNode) -> String {
        if node.id().is_empty() || self.node(node.id()).is_some() {
            let id = self.unique_id(node.kind);
            node.set("id", id);
        }
        let id = node.id().to_string();
        self.nodes.push(node);
        id
    }

    /// Remove a node. Returns it if it existed.
    pub fn remove_node(&mut self, id: &str) -> Option<SceneNode> {
        let index = self.nodes.iter().position(|n| n.id() == id)?;
        Some(self.nodes.remove(index))
    }

    /// Merge every node of another scene file into this one.
    ///
    /// Imported nodes whose id is already taken are renamed and references
    /// among the imported nodes follow the rename. Returns the final ids of
    /// the imported nodes in file order.
    pub fn import(&mut self, path: &Path) -> ModelResult<Vec<String>> {
        let other = Scene::load(path)?;
        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut imported = Vec::with_capacity(other.nodes.len());

        for node in &other.nodes {
            let id = node.id();
            if !id.is_empty() && self.node(id).is_some() {
                let mut fresh = self.unique_id(node.kind);
                // Avoid ids that later imported nodes still carry.
                let mut n = 0;
                while other.node(&fresh).is_some() || renamed.values().any(|v| *v == fresh) {
                    n += 1;
                    fresh = format!("{}Imported{}", node.kind.id_prefix(), n);
                }
                renamed.insert(id.to_string(), fresh);
            }
            let mut copy = node.clone();
            if let Some(new_id) = renamed.get(id) {
                copy.set("id", new_id.clone());
            }
            imported.push(self.add_node(copy));
        }

        if !renamed.is_empty() {
            for id in &imported {
                if let Some(node) = self.node_mut(id) {
                    for (key, value) in node.attributes.iter_mut() {
                        if key.ends_with("Ref") {
                            *value = value
                                .split_whitespace()
                                .map(|r| renamed.get(r).map(String::as_str).unwrap_or(r))
                                .collect::<Vec<_>>()
                                .join(" ");
                        }
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            nodes = imported.len(),
            renamed = renamed.len(),
            "Imported scene"
        );
        Ok(imported)
    }

    /// Serialize the scene.
    pub fn to_xml(&self) -> ModelResult<String> {
        let werr = |e: std::io::Error| ModelError::io_write(&self.path, e);
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(werr)?;
        let root = BytesStart::new("MRML").with_attributes(
            self.root_attributes
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        writer.write_event(Event::Start(root)).map_err(werr)?;

        for node in &self.nodes {
            let start = BytesStart::new(node.tag.as_str()).with_attributes(
                node.attributes
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
            if node.content.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(werr)?;
            } else {
                writer.write_event(Event::Start(start)).map_err(werr)?;
                for event in &node.content {
                    writer.write_event(event.clone()).map_err(werr)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(node.tag.as_str())))
                    .map_err(werr)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("MRML")))
            .map_err(werr)?;
        String::from_utf8(writer.into_inner()).map_err(|e| {
            ModelError::io_write(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Write the scene to its path.
    pub fn commit(&self) -> ModelResult<()> {
        let xml = self.to_xml()?;
        let result = std::fs::write(&self.path, xml);
        log_io_operation("write", &self.path, result.is_ok());
        result.map_err(|e| ModelError::io_write(&self.path, e))?;
        info!(path = %self.path.display(), nodes = self.nodes.len(), "Committed scene");
        Ok(())
    }
}

fn read_attributes(start: &BytesStart<'_>, path: &Path) -> ModelResult<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| ModelError::parse(path, e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ModelError::parse(path, e.to_string()))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

fn node_from_start(start: &BytesStart<'_>, path: &Path) -> ModelResult<SceneNode> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    Ok(SceneNode {
        kind: NodeKind::from_tag(&tag),
        tag,
        attributes: read_attributes(start, path)?,
        content: Vec::new(),
    })
}

fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Where the scene goes: a file path plus an optional root hierarchy id,
/// written `path#id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneTarget {
    pub path: PathBuf,
    pub hierarchy_id: Option<String>,
}

impl SceneTarget {
    /// Split `path#id` at the last `#`.
    pub fn parse(text: &str) -> Self {
        match text.rfind('#') {
            Some(at) => Self {
                path: PathBuf::from(&text[..at]),
                hierarchy_id: Some(text[at + 1..].to_string()).filter(|id| !id.is_empty()),
            },
            None => Self {
                path: PathBuf::from(text),
                hierarchy_id: None,
            },
        }
    }

    /// `<input stem>.mrml` in the working directory.
    pub fn default_for(input: &Path) -> ModelResult<Self> {
        let stem = input
            .file_stem()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ModelError::NoOutputPath {
                input: input.to_path_buf(),
            })?;
        let mut path = PathBuf::from(stem);
        path.set_extension("mrml");
        Ok(Self {
            path,
            hierarchy_id: None,
        })
    }

    /// Directory the scene file and the models live in.
    pub fn root_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// A written model, ready to be registered in the scene.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct ModelArtifact {
    pub label: i32,
    pub name: String,
    pub path: PathBuf,
    /// Display color, RGB in `[0, 1]`.
    pub color: [f64; 3],
}

/// Default display color of models without a color table entry.
pub const DEFAULT_MODEL_COLOR: [f64; 3] = [0.5, 0.5, 0.5];

/// Builds the output scene as models are made.
#[derive(Debug)]
pub struct ModelCollectionBuilder {
    scene: Scene,
    root_dir: PathBuf,
    root_id: String,
    template_top: Option<String>,
    transient: Vec<String>,
}

impl ModelCollectionBuilder {
    /// Open the target scene, resolve the root hierarchy node and import the
    /// hierarchy template.
    ///
    /// A missing scene file starts an empty scene. A missing template logs a
    /// warning and leaves the hierarchy flat. `color_table` registers
    /// transient color table nodes that [`finish`](Self::finish) removes.
    pub fn open(
        target: &SceneTarget,
        template: Option<&Path>,
        color_table: Option<&Path>,
    ) -> ModelResult<Self> {
        let mut scene = if target.path.exists() {
            let scene = Scene::load(&target.path)?;
            debug!(path = %target.path.display(), "Imported model scene file");
            scene
        } else {
            warn!(path = %target.path.display(), "Model scene file doesn't exist yet");
            Scene::new(&target.path)
        };

        let existing_root = target
            .hierarchy_id
            .as_deref()
            .and_then(|id| scene.node(id))
            .filter(|n| n.kind == NodeKind::Hierarchy)
            .map(|n| n.id().to_string());
        let root_id = match existing_root {
            Some(id) => {
                debug!(root = %id, "Using existing model hierarchy node");
                id
            }
            None => {
                if let Some(id) = &target.hierarchy_id {
                    warn!(id = %id, "No model hierarchy node with this id, creating one");
                }
                scene.add_node(
                    SceneNode::new(NodeKind::Hierarchy)
                        .with("name", "Models")
                        .with("hideFromEditors", flag(false))
                        .with("expanded", flag(true)),
                )
            }
        };

        let mut template_top = None;
        if let Some(template) = template {
            if template.exists() {
                let imported = scene.import(template)?;
                template_top = imported
                    .iter()
                    .find(|id| scene.node(id).is_some_and(|n| n.kind == NodeKind::Hierarchy))
                    .cloned();
                match &template_top {
                    Some(top) => {
                        if let Some(node) = scene.node_mut(top) {
                            node.set("parentNodeRef", root_id.clone());
                        }
                        // Imported hierarchy nodes left under the root move under the template top.
                        for id in &imported {
                            if id == top {
                                continue;
                            }
                            if let Some(node) = scene.node_mut(id)
                                && node.kind == NodeKind::Hierarchy
                                && node.parent() == Some(root_id.as_str())
                            {
                                node.set("parentNodeRef", top.clone());
                            }
                        }
                    }
                    None => warn!(
                        path = %template.display(),
                        "Model hierarchy scene file has no model hierarchy node"
                    ),
                }
            } else {
                warn!(
                    path = %template.display(),
                    "Model hierarchy scene file doesn't exist, using a flat hierarchy"
                );
            }
        }

        let needs_display = scene
            .node(&root_id)
            .is_some_and(|n| n.get("displayNodeRef").is_none_or(str::is_empty));
        if needs_display {
            let display = scene.add_node(
                SceneNode::new(NodeKind::Display).with("visibility", flag(true)),
            );
            if let Some(root) = scene.node_mut(&root_id) {
                root.set("displayNodeRef", display);
            }
        }

        let mut transient = Vec::new();
        if let Some(path) = color_table {
            let storage = scene.add_node(
                SceneNode::new(NodeKind::ColorTableStorage)
                    .with("fileName", path.display().to_string()),
            );
            transient.push(scene.add_node(
                SceneNode::new(NodeKind::ColorTable).with("storageNodeRef", storage.clone()),
            ));
            transient.push(storage);
        }

        Ok(Self {
            root_dir: target.root_dir(),
            scene,
            root_id,
            template_top,
            transient,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Id of the imported template's top hierarchy node.
    pub fn template_top(&self) -> Option<&str> {
        self.template_top.as_deref()
    }

    /// Register a model. `color_name` is the hierarchy template node name to
    /// attach it to. Returns the model node id.
    pub fn add_model(&mut self, artifact: &ModelArtifact, color_name: &str) -> String {
        let file_name = artifact
            .path
            .strip_prefix(&self.root_dir)
            .unwrap_or(&artifact.path)
            .display()
            .to_string();
        let storage = self
            .scene
            .add_node(SceneNode::new(NodeKind::Storage).with("fileName", file_name));
        let [r, g, b] = artifact.color;
        let display = self.scene.add_node(
            SceneNode::new(NodeKind::Display)
                .with("color", format!("{} {} {}", r, g, b))
                .with("visibility", flag(true)),
        );
        let model = self.scene.add_node(
            SceneNode::new(NodeKind::Model)
                .with("name", artifact.name.clone())
                .with("storageNodeRef", storage)
                .with("displayNodeRef", display),
        );

        let template_node = self
            .template_top
            .as_ref()
            .filter(|_| !color_name.is_empty())
            .and_then(|_| self.scene.first_node_by_name(color_name))
            .filter(|n| n.kind == NodeKind::Hierarchy)
            .map(|n| n.id().to_string());

        match template_node.and_then(|id| self.scene.node_mut(&id)) {
            Some(node) => {
                debug!(hierarchy = %node.id(), model = %model, "Attached model to template hierarchy node");
                node.set("associatedNodeRef", model.clone());
                node.set("hideFromEditors", flag(true));
            }
            None => {
                self.scene.add_node(
                    SceneNode::new(NodeKind::Hierarchy)
                        .with("hideFromEditors", flag(true))
                        .with("parentNodeRef", self.root_id.clone())
                        .with("associatedNodeRef", model.clone()),
                );
            }
        }
        model
    }

    /// Remove template hierarchy nodes with neither a model nor children,
    /// repeating until none is left, along with their display nodes.
    /// Returns how many were removed.
    pub fn prune_template(&mut self) -> usize {
        let Some(top) = self.template_top.clone() else {
            return 0;
        };
        let mut removed = 0;
        loop {
            let empty: Vec<String> = self
                .scene
                .descendants(&top)
                .into_iter()
                .filter(|id| {
                    self.scene.node(id).is_some_and(|n| {
                        n.kind == NodeKind::Hierarchy && n.associated().is_none()
                    }) && self.scene.children(id).is_empty()
                })
                .collect();
            if empty.is_empty() {
                break;
            }
            for id in empty {
                if let Some(node) = self.scene.remove_node(&id) {
                    debug!(name = node.name().unwrap_or(""), "Removing extraneous hierarchy node");
                    if let Some(display) = node.get("displayNodeRef") {
                        self.scene.remove_node(display);
                    }
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Prune the template, drop the color table nodes and write the scene.
    pub fn finish(mut self) -> ModelResult<Scene> {
        let pruned = self.prune_template();
        for id in std::mem::take(&mut self.transient) {
            self.scene.remove_node(&id);
        }
        self.scene.commit()?;
        info!(
            path = %self.scene.path().display(),
            pruned,
            "Models saved to scene file"
        );
        Ok(self.scene)
    }
}
