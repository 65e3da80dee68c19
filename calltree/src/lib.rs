//! Aggregated call trees built from sampled stacks.
//!
//! This library holds the sink side of a profile conversion: the shared
//! [`ThreadIdentity`] and [`StackFrame`] values a parser produces, the
//! [`CallTreeSink`] capability it feeds, and [`CallTree`], an aggregate that
//! merges identical root-to-leaf paths into weighted nodes.
//!
//! A finished tree can be exported as an NDJSON tree file ([`TreeFile`]),
//! as collapsed "folded" stacks for flamegraph renderers, or as a compact
//! binary snapshot.
//!
//! # Example
//!
//! ```
//! use calltree::{CallTree, CallTreeSink, StackFrame, ThreadIdentity};
//! use std::rc::Rc;
//!
//! let thread = Rc::new(ThreadIdentity::new("88707", "Indexing-88707"));
//! let main = Rc::new(StackFrame::new("1000", "main", "/usr/bin/app"));
//! let work = Rc::new(StackFrame::new("1040", "work", "/usr/bin/app"));
//!
//! let mut tree = CallTree::new();
//! tree.add_stack(&thread, &[main.clone(), work.clone()], 1);
//! tree.add_stack(&thread, &[main, work], 1);
//!
//! let path = tree.thread("88707").unwrap().find_path(&["main", "work"]).unwrap();
//! assert_eq!(path.total(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::rc::Rc;
use thiserror::Error;

/// Errors that can occur while reading a tree file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("binary snapshot decode error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("missing header record")]
    MissingHeader,

    #[error("header must be first record, found at line {0}")]
    HeaderNotFirst(usize),

    #[error("duplicate header at line {0}")]
    DuplicateHeader(usize),

    #[error("duplicate node id {0}")]
    DuplicateNode(u64),

    #[error("node {node_id} references non-existent frame {frame_id}")]
    InvalidFrameReference { node_id: u64, frame_id: u64 },

    #[error("node {node_id} references non-existent thread '{thread}'")]
    InvalidThreadReference { node_id: u64, thread: String },

    #[error("node {node_id} references parent {parent_id} that is not an earlier node of the same thread")]
    InvalidParentReference { node_id: u64, parent_id: u64 },

    #[error("node {0} must have both a parent and a frame, or neither")]
    MalformedNode(u64),

    #[error("unknown record type '{0}' at line {1}")]
    UnknownRecordType(String, usize),
}

/// Result type for tree file parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur while exporting a tree.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary snapshot encode error: {0}")]
    Binary(#[from] postcard::Error),
}

/// Result type for tree export operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

// ============================================================================
// Stack values
// ============================================================================

/// A sampled thread.
///
/// Identity is determined by `id`; parsers hand out one shared instance per
/// id so that reference equality implies content equality within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadIdentity {
    pub id: Rc<str>,
    pub display_name: Rc<str>,
}

impl ThreadIdentity {
    pub fn new(id: impl Into<Rc<str>>, display_name: impl Into<Rc<str>>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// One entry of a stack: address offset, display name and origin file.
///
/// `file` is empty when the origin is unknown or carries no provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    pub offset: Rc<str>,
    pub name: Rc<str>,
    pub file: Rc<str>,
}

impl StackFrame {
    pub fn new(
        offset: impl Into<Rc<str>>,
        name: impl Into<Rc<str>>,
        file: impl Into<Rc<str>>,
    ) -> Self {
        Self {
            offset: offset.into(),
            name: name.into(),
            file: file.into(),
        }
    }

    /// Name with the origin file appended in parentheses, when there is one.
    pub fn full_name(&self) -> String {
        if self.file.is_empty() {
            self.name.to_string()
        } else {
            format!("{} ({})", self.name, self.file)
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Anything that accepts completed stacks.
///
/// Frames are ordered root first. Calls arrive serially from a single parse
/// and a well-formed call is never rejected.
pub trait CallTreeSink {
    fn add_stack(&mut self, thread: &Rc<ThreadIdentity>, frames: &[Rc<StackFrame>], weight: u64);
}

impl<S: CallTreeSink + ?Sized> CallTreeSink for &mut S {
    fn add_stack(&mut self, thread: &Rc<ThreadIdentity>, frames: &[Rc<StackFrame>], weight: u64) {
        (**self).add_stack(thread, frames, weight);
    }
}

// ============================================================================
// Call tree
// ============================================================================

/// Index of a node within its [`ThreadTree`]. The root is always `0`.
pub type NodeId = usize;

/// One node of a per-thread call tree.
#[derive(Debug, Clone)]
pub struct Node {
    frame: Option<Rc<StackFrame>>,
    parent: Option<NodeId>,
    total: u64,
    self_hits: u64,
    children: HashMap<Rc<StackFrame>, NodeId>,
}

impl Node {
    fn new(frame: Option<Rc<StackFrame>>, parent: Option<NodeId>) -> Self {
        Self {
            frame,
            parent,
            total: 0,
            self_hits: 0,
            children: HashMap::new(),
        }
    }

    /// The frame of this node, `None` for the thread root.
    pub fn frame(&self) -> Option<&Rc<StackFrame>> {
        self.frame.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Weight of every stack passing through this node.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Weight of the stacks ending exactly at this node.
    pub fn self_hits(&self) -> u64 {
        self.self_hits
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// The call tree of a single thread.
///
/// Nodes are stored in creation order, so a parent always precedes its
/// children.
#[derive(Debug, Clone)]
pub struct ThreadTree {
    thread: Rc<ThreadIdentity>,
    nodes: Vec<Node>,
}

impl ThreadTree {
    fn new(thread: Rc<ThreadIdentity>) -> Self {
        Self {
            thread,
            nodes: vec![Node::new(None, None)],
        }
    }

    pub fn thread(&self) -> &Rc<ThreadIdentity> {
        &self.thread
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn total(&self) -> u64 {
        self.root().total
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over all nodes with their ids, parents before children.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate()
    }

    /// Children of `id` in creation order.
    pub fn children(&self, id: NodeId) -> Vec<(NodeId, &Node)> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.into_iter().map(|c| (c, &self.nodes[c])).collect()
    }

    /// Follow a path of frame names from the root.
    ///
    /// When several sibling frames share a name (different offsets or files)
    /// the earliest created one is taken.
    pub fn find_path(&self, names: &[&str]) -> Option<&Node> {
        let mut current = 0;
        for name in names {
            current = self
                .children(current)
                .into_iter()
                .find(|(_, n)| n.frame().is_some_and(|f| &*f.name == *name))
                .map(|(id, _)| id)?;
        }
        self.nodes.get(current)
    }

    /// Frames from the root down to `id`, excluding the root itself.
    pub fn path_to(&self, id: NodeId) -> Vec<&Rc<StackFrame>> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor.and_then(|c| self.nodes.get(c)) {
            if let Some(frame) = &node.frame {
                path.push(frame);
            }
            cursor = node.parent;
        }
        path.reverse();
        path
    }

    fn child_or_insert(&mut self, parent: NodeId, frame: &Rc<StackFrame>) -> NodeId {
        if let Some(&id) = self.nodes[parent].children.get(frame) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::new(Some(frame.clone()), Some(parent)));
        self.nodes[parent].children.insert(frame.clone(), id);
        id
    }

    fn add_path(&mut self, frames: &[Rc<StackFrame>], weight: u64) {
        let mut current = 0;
        self.nodes[current].total += weight;
        for frame in frames {
            current = self.child_or_insert(current, frame);
            self.nodes[current].total += weight;
        }
        self.nodes[current].self_hits += weight;
    }
}

/// Stacks aggregated per thread into weighted root-to-leaf paths.
#[derive(Debug, Clone, Default)]
pub struct CallTree {
    threads: Vec<ThreadTree>,
    thread_index: HashMap<Rc<str>, usize>,
    total_samples: u64,
}

impl CallTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total weight of every stack added so far.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Per-thread trees in the order threads were first seen.
    pub fn threads(&self) -> impl Iterator<Item = &ThreadTree> {
        self.threads.iter()
    }

    /// Look up a thread tree by thread id.
    pub fn thread(&self, id: &str) -> Option<&ThreadTree> {
        self.thread_index.get(id).map(|&i| &self.threads[i])
    }

    fn thread_mut(&mut self, thread: &Rc<ThreadIdentity>) -> &mut ThreadTree {
        let index = match self.thread_index.get(&thread.id) {
            Some(&i) => i,
            None => {
                let i = self.threads.len();
                self.threads.push(ThreadTree::new(thread.clone()));
                self.thread_index.insert(thread.id.clone(), i);
                i
            }
        };
        &mut self.threads[index]
    }

    /// Merge another tree into this one.
    ///
    /// Threads are matched by id and frames by content, so trees from
    /// separate parses combine into the tree a single parse would build.
    pub fn merge(&mut self, other: &CallTree) {
        for theirs in &other.threads {
            let ours = self.thread_mut(&theirs.thread);
            let mut mapping: Vec<NodeId> = Vec::with_capacity(theirs.nodes.len());
            for node in &theirs.nodes {
                let id = match (&node.frame, node.parent) {
                    (Some(frame), Some(parent)) => ours.child_or_insert(mapping[parent], frame),
                    _ => 0,
                };
                ours.nodes[id].total += node.total;
                ours.nodes[id].self_hits += node.self_hits;
                mapping.push(id);
            }
        }
        self.total_samples += other.total_samples;
    }

    /// Write one `thread;root;...;leaf weight` line per path with self weight.
    pub fn write_collapsed<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        for tree in &self.threads {
            for (id, node) in tree.nodes() {
                if node.self_hits == 0 {
                    continue;
                }
                let mut line = tree.thread.display_name.to_string();
                for frame in tree.path_to(id) {
                    line.push(';');
                    line.push_str(&frame.full_name());
                }
                writeln!(writer, "{} {}", line, node.self_hits)?;
            }
        }
        Ok(())
    }

    /// Flatten the tree into its exportable record form.
    pub fn to_tree_file(&self, source_tool: &str, time_range: Option<TimeRange>) -> TreeFile {
        let mut frame_ids: HashMap<&StackFrame, u64> = HashMap::new();
        let mut frames = Vec::new();
        let mut threads = Vec::new();
        let mut nodes = Vec::new();
        let mut next_node = 1u64;

        for tree in &self.threads {
            threads.push(ThreadDef {
                id: tree.thread.id.to_string(),
                name: tree.thread.display_name.to_string(),
                total: tree.total(),
            });

            let mut node_ids: Vec<u64> = Vec::with_capacity(tree.nodes.len());
            for node in &tree.nodes {
                let frame = node.frame.as_deref().map(|f| {
                    let next = frame_ids.len() as u64 + 1;
                    *frame_ids.entry(f).or_insert_with(|| {
                        frames.push(FrameDef {
                            id: next,
                            name: f.name.to_string(),
                            offset: f.offset.to_string(),
                            file: f.file.to_string(),
                        });
                        next
                    })
                });
                nodes.push(NodeDef {
                    id: next_node,
                    thread: tree.thread.id.to_string(),
                    parent: node.parent.map(|p| node_ids[p]),
                    frame,
                    total: node.total,
                    self_hits: node.self_hits,
                });
                node_ids.push(next_node);
                next_node += 1;
            }
        }

        TreeFile {
            header: Header {
                format: FORMAT_NAME.to_string(),
                version: FORMAT_VERSION.to_string(),
                source_tool: source_tool.to_string(),
                frame_order: FrameOrder::RootToLeaf,
                total_samples: self.total_samples,
                time_range,
            },
            frames,
            threads,
            nodes,
        }
    }

    /// Rebuild a tree from a validated tree file.
    pub fn from_tree_file(file: &TreeFile) -> Self {
        let frames: HashMap<u64, Rc<StackFrame>> = file
            .frames
            .iter()
            .map(|f| {
                let frame = StackFrame::new(f.offset.as_str(), f.name.as_str(), f.file.as_str());
                (f.id, Rc::new(frame))
            })
            .collect();
        let threads: HashMap<&str, Rc<ThreadIdentity>> = file
            .threads
            .iter()
            .map(|t| {
                let thread = ThreadIdentity::new(t.id.as_str(), t.name.as_str());
                (t.id.as_str(), Rc::new(thread))
            })
            .collect();

        let mut tree = CallTree::new();
        let mut mapping: HashMap<u64, NodeId> = HashMap::new();
        for def in &file.nodes {
            let Some(thread) = threads.get(def.thread.as_str()) else {
                continue;
            };
            let ours = tree.thread_mut(thread);
            let id = match (def.parent, def.frame) {
                (Some(parent), Some(frame)) => {
                    match (mapping.get(&parent), frames.get(&frame)) {
                        (Some(&parent), Some(frame)) => ours.child_or_insert(parent, frame),
                        _ => continue,
                    }
                }
                _ => 0,
            };
            ours.nodes[id].total += def.total;
            ours.nodes[id].self_hits += def.self_hits;
            mapping.insert(def.id, id);
        }
        tree.total_samples = file.header.total_samples;
        tree
    }
}

impl CallTreeSink for CallTree {
    fn add_stack(&mut self, thread: &Rc<ThreadIdentity>, frames: &[Rc<StackFrame>], weight: u64) {
        self.thread_mut(thread).add_path(frames, weight);
        self.total_samples += weight;
    }
}

// ============================================================================
// Tree file records
// ============================================================================

/// Value of the `format` header field.
pub const FORMAT_NAME: &str = "calltree";

/// Value of the `version` header field written by this library.
pub const FORMAT_VERSION: &str = "1.0";

/// Frame ordering along node paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrder {
    LeafToRoot,
    RootToLeaf,
}

/// Time range covered by the samples, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
    pub unit: String,
}

impl TimeRange {
    pub fn micros(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            unit: "microseconds".to_string(),
        }
    }
}

/// Tree file header record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub format: String,
    pub version: String,
    pub source_tool: String,
    pub frame_order: FrameOrder,
    #[serde(default)]
    pub total_samples: u64,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

/// Frame dictionary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDef {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default)]
    pub file: String,
}

/// Thread dictionary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub total: u64,
}

/// Call tree node record. Thread roots have neither parent nor frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: u64,
    pub thread: String,
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub frame: Option<u64>,
    pub total: u64,
    #[serde(rename = "self", default)]
    pub self_hits: u64,
}

/// Raw record used during parsing to determine type.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: String,
}

/// Helper struct for writing typed records with "type" field.
#[derive(Serialize)]
struct TypedRecord<'a, T: Serialize> {
    #[serde(rename = "type")]
    record_type: &'a str,
    #[serde(flatten)]
    data: &'a T,
}

// ============================================================================
// TreeFile
// ============================================================================

/// An exported call tree: header, frame and thread dictionaries, and nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeFile {
    pub header: Header,
    pub frames: Vec<FrameDef>,
    pub threads: Vec<ThreadDef>,
    pub nodes: Vec<NodeDef>,
}

impl TreeFile {
    /// Parse an NDJSON tree file from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let buf_reader = BufReader::new(reader);
        let mut header: Option<Header> = None;
        let mut frames: Vec<FrameDef> = Vec::new();
        let mut threads: Vec<ThreadDef> = Vec::new();
        let mut nodes: Vec<NodeDef> = Vec::new();

        for (line_num, line_result) in buf_reader.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line_result?;

            if line.trim().is_empty() {
                continue;
            }

            let raw: RawRecord = serde_json::from_str(&line).map_err(|e| ParseError::Json {
                line: line_num,
                source: e,
            })?;

            match raw.record_type.as_str() {
                "header" => {
                    if header.is_some() {
                        return Err(ParseError::DuplicateHeader(line_num));
                    }
                    if line_num != 1 {
                        return Err(ParseError::HeaderNotFirst(line_num));
                    }
                    header = Some(record(&line, line_num)?);
                }
                _ if header.is_none() => {
                    return Err(ParseError::HeaderNotFirst(line_num));
                }
                "frame" => frames.push(record(&line, line_num)?),
                "thread" => threads.push(record(&line, line_num)?),
                "node" => nodes.push(record(&line, line_num)?),
                other => {
                    return Err(ParseError::UnknownRecordType(other.to_string(), line_num));
                }
            }
        }

        let header = header.ok_or(ParseError::MissingHeader)?;
        let file = TreeFile {
            header,
            frames,
            threads,
            nodes,
        };
        file.validate()?;
        Ok(file)
    }

    /// Check that every node reference resolves and parents come first.
    fn validate(&self) -> Result<()> {
        let frame_ids: HashSet<u64> = self.frames.iter().map(|f| f.id).collect();
        let thread_ids: HashSet<&str> = self.threads.iter().map(|t| t.id.as_str()).collect();
        let mut seen: HashMap<u64, &str> = HashMap::new();

        for node in &self.nodes {
            if seen.contains_key(&node.id) {
                return Err(ParseError::DuplicateNode(node.id));
            }
            if !thread_ids.contains(node.thread.as_str()) {
                return Err(ParseError::InvalidThreadReference {
                    node_id: node.id,
                    thread: node.thread.clone(),
                });
            }
            match (node.parent, node.frame) {
                (Some(parent_id), Some(frame_id)) => {
                    if seen.get(&parent_id) != Some(&node.thread.as_str()) {
                        return Err(ParseError::InvalidParentReference {
                            node_id: node.id,
                            parent_id,
                        });
                    }
                    if !frame_ids.contains(&frame_id) {
                        return Err(ParseError::InvalidFrameReference {
                            node_id: node.id,
                            frame_id,
                        });
                    }
                }
                (None, None) => {}
                _ => return Err(ParseError::MalformedNode(node.id)),
            }
            seen.insert(node.id, node.thread.as_str());
        }

        Ok(())
    }

    /// Write this tree file in NDJSON format: header, frames, threads, nodes.
    pub fn write<W: Write>(&self, writer: W) -> WriteResult<()> {
        let mut tree_writer = TreeWriter::new(writer);
        tree_writer.write_header(&self.header)?;
        for frame in &self.frames {
            tree_writer.write_frame(frame)?;
        }
        for thread in &self.threads {
            tree_writer.write_thread(thread)?;
        }
        for node in &self.nodes {
            tree_writer.write_node(node)?;
        }
        Ok(())
    }

    /// Encode as a compact binary snapshot.
    pub fn write_binary<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        let bytes = postcard::to_stdvec(self)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Decode a binary snapshot written by [`TreeFile::write_binary`].
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let file: TreeFile = postcard::from_bytes(bytes)?;
        file.validate()?;
        Ok(file)
    }

    /// Number of distinct root-to-leaf paths that end with self weight.
    pub fn leaf_paths(&self) -> usize {
        self.nodes.iter().filter(|n| n.self_hits > 0).count()
    }

    /// Per-thread counts, in thread record order.
    pub fn thread_summaries(&self) -> Vec<ThreadSummary> {
        let mut summaries: Vec<ThreadSummary> = self
            .threads
            .iter()
            .map(|t| ThreadSummary {
                id: t.id.clone(),
                name: t.name.clone(),
                total: t.total,
                root_total: None,
                nodes: 0,
                self_hits: 0,
            })
            .collect();
        let index: HashMap<&str, usize> = self
            .threads
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        for node in &self.nodes {
            let Some(&i) = index.get(node.thread.as_str()) else {
                continue;
            };
            let summary = &mut summaries[i];
            summary.nodes += 1;
            summary.self_hits += node.self_hits;
            if node.parent.is_none() {
                summary.root_total = Some(node.total);
            }
        }
        summaries
    }
}

/// Counts for one thread of a [`TreeFile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: String,
    pub name: String,
    /// Samples claimed by the thread record.
    pub total: u64,
    /// Total of the thread's root node, if it has one.
    pub root_total: Option<u64>,
    pub nodes: usize,
    /// Sum of self hits over all of the thread's nodes.
    pub self_hits: u64,
}

impl ThreadSummary {
    /// The thread record, its root node and its self hits agree on the sample count.
    pub fn is_consistent(&self) -> bool {
        self.root_total == Some(self.total) && self.self_hits == self.total
    }
}

fn record<T: serde::de::DeserializeOwned>(line: &str, line_num: usize) -> Result<T> {
    serde_json::from_str(line).map_err(|e| ParseError::Json {
        line: line_num,
        source: e,
    })
}

// ============================================================================
// Writer
// ============================================================================

/// Writer for creating tree files incrementally.
pub struct TreeWriter<W: Write> {
    writer: W,
}

impl<W: Write> TreeWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a header record. This should be called first.
    pub fn write_header(&mut self, header: &Header) -> WriteResult<()> {
        self.write_record("header", header)
    }

    pub fn write_frame(&mut self, frame: &FrameDef) -> WriteResult<()> {
        self.write_record("frame", frame)
    }

    pub fn write_thread(&mut self, thread: &ThreadDef) -> WriteResult<()> {
        self.write_record("thread", thread)
    }

    pub fn write_node(&mut self, node: &NodeDef) -> WriteResult<()> {
        self.write_record("node", node)
    }

    fn write_record<T: Serialize>(&mut self, record_type: &str, data: &T) -> WriteResult<()> {
        let typed = TypedRecord { record_type, data };
        let json = serde_json::to_string(&typed)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn frame(name: &str) -> Rc<StackFrame> {
        Rc::new(StackFrame::new("0", name, "/bin/app"))
    }

    fn thread(id: &str) -> Rc<ThreadIdentity> {
        Rc::new(ThreadIdentity::new(id, format!("worker-{}", id)))
    }

    fn sample_tree() -> CallTree {
        let t1 = thread("1");
        let t2 = thread("2");
        let (main, foo, bar) = (frame("main"), frame("foo"), frame("bar"));

        let mut tree = CallTree::new();
        tree.add_stack(&t1, &[main.clone(), foo.clone()], 1);
        tree.add_stack(&t1, &[main.clone(), foo.clone()], 1);
        tree.add_stack(&t1, &[main.clone(), bar.clone()], 1);
        tree.add_stack(&t1, &[main.clone()], 1);
        tree.add_stack(&t2, &[main, foo], 3);
        tree
    }

    fn minimal_tree_file() -> String {
        r#"{"type":"header","format":"calltree","version":"1.0","source_tool":"perf","frame_order":"root_to_leaf","total_samples":1}"#.to_string()
    }

    #[test]
    fn aggregates_identical_paths() {
        let tree = sample_tree();
        let t1 = tree.thread("1").unwrap();

        assert_eq!(tree.total_samples(), 7);
        assert_eq!(tree.thread_count(), 2);
        assert_eq!(t1.total(), 4);
        assert_eq!(t1.root().child_count(), 1);

        let main = t1.find_path(&["main"]).unwrap();
        assert_eq!(main.total(), 4);
        assert_eq!(main.self_hits(), 1);
        assert_eq!(main.child_count(), 2);

        let foo = t1.find_path(&["main", "foo"]).unwrap();
        assert_eq!(foo.total(), 2);
        assert_eq!(foo.self_hits(), 2);

        assert_eq!(tree.thread("2").unwrap().total(), 3);
    }

    #[test]
    fn frames_with_same_name_but_different_file_stay_apart() {
        let t = thread("1");
        let a = Rc::new(StackFrame::new("0", "f", "/a"));
        let b = Rc::new(StackFrame::new("0", "f", "/b"));

        let mut tree = CallTree::new();
        tree.add_stack(&t, &[a], 1);
        tree.add_stack(&t, &[b], 1);

        assert_eq!(tree.thread("1").unwrap().root().child_count(), 2);
    }

    #[test]
    fn frames_are_matched_by_content() {
        let t = thread("1");
        let mut tree = CallTree::new();
        tree.add_stack(&t, &[frame("main")], 1);
        tree.add_stack(&t, &[frame("main")], 1);

        let main = tree.thread("1").unwrap().find_path(&["main"]).unwrap();
        assert_eq!(main.total(), 2);
    }

    #[test]
    fn empty_stack_counts_on_root() {
        let t = thread("1");
        let mut tree = CallTree::new();
        tree.add_stack(&t, &[], 1);

        let root = tree.thread("1").unwrap().root();
        assert_eq!(root.total(), 1);
        assert_eq!(root.self_hits(), 1);
    }

    #[test]
    fn merge_matches_single_tree() {
        let t = thread("1");
        let (main, foo) = (frame("main"), frame("foo"));

        let mut left = CallTree::new();
        left.add_stack(&t, &[main.clone(), foo.clone()], 1);
        let mut right = CallTree::new();
        right.add_stack(&t, &[main.clone(), foo.clone()], 2);
        right.add_stack(&thread("9"), &[main.clone()], 1);

        left.merge(&right);

        assert_eq!(left.total_samples(), 4);
        assert_eq!(left.thread_count(), 2);
        let foo_node = left.thread("1").unwrap().find_path(&["main", "foo"]).unwrap();
        assert_eq!(foo_node.total(), 3);
        assert_eq!(foo_node.self_hits(), 3);
        assert_eq!(left.thread("1").unwrap().node_count(), 3);
    }

    #[test]
    fn collapsed_output_lists_self_weights() {
        let mut output = Vec::new();
        sample_tree().write_collapsed(&mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "worker-1;main (/bin/app) 1",
                "worker-1;main (/bin/app);foo (/bin/app) 2",
                "worker-1;main (/bin/app);bar (/bin/app) 1",
                "worker-2;main (/bin/app);foo (/bin/app) 3",
            ]
        );
    }

    #[test]
    fn full_name_omits_empty_file() {
        assert_eq!(StackFrame::new("1", "Foo.run", "").full_name(), "Foo.run");
        assert_eq!(StackFrame::new("1", "main", "/bin/app").full_name(), "main (/bin/app)");
    }

    #[test]
    fn tree_file_output_validates() {
        let tree = sample_tree();
        let file = tree.to_tree_file("perf", Some(TimeRange::micros(10, 20)));

        let mut output = Vec::new();
        file.write(&mut output).unwrap();

        let parsed = TreeFile::parse(Cursor::new(output)).unwrap();
        assert_eq!(parsed, file);
        assert_eq!(parsed.header.frame_order, FrameOrder::RootToLeaf);
        assert_eq!(parsed.header.total_samples, 7);
        assert_eq!(parsed.frames.len(), 3);
        assert_eq!(parsed.threads.len(), 2);
        assert_eq!(parsed.leaf_paths(), 4);

        let rebuilt = CallTree::from_tree_file(&parsed);
        let foo = rebuilt.thread("1").unwrap().find_path(&["main", "foo"]).unwrap();
        assert_eq!(foo.total(), 2);
        assert_eq!(rebuilt.total_samples(), 7);
    }

    #[test]
    fn thread_summaries_count_per_thread() {
        let file = sample_tree().to_tree_file("perf", None);
        let summaries = file.thread_summaries();

        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries[0],
            ThreadSummary {
                id: "1".to_string(),
                name: "worker-1".to_string(),
                total: 4,
                root_total: Some(4),
                nodes: 4,
                self_hits: 4,
            }
        );
        assert_eq!(summaries[1].total, 3);
        assert_eq!(summaries[1].nodes, 3);
        assert!(summaries.iter().all(ThreadSummary::is_consistent));
        assert_eq!(
            summaries.iter().map(|s| s.total).sum::<u64>(),
            file.header.total_samples
        );
    }

    #[test]
    fn thread_summary_flags_mismatched_totals() {
        let mut file = sample_tree().to_tree_file("perf", None);
        file.threads[0].total = 5;

        let summaries = file.thread_summaries();
        assert!(!summaries[0].is_consistent());
        assert!(summaries[1].is_consistent());
    }

    #[test]
    fn binary_snapshot_decodes() {
        let file = sample_tree().to_tree_file("perf", None);
        let mut bytes = Vec::new();
        file.write_binary(&mut bytes).unwrap();

        assert_eq!(TreeFile::from_binary(&bytes).unwrap(), file);
    }

    #[test]
    fn missing_header_fails() {
        let result = TreeFile::parse(Cursor::new(""));
        assert!(matches!(result, Err(ParseError::MissingHeader)));
    }

    #[test]
    fn non_header_first_fails() {
        let data = r#"{"type":"frame","id":1,"name":"main"}"#;
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(result, Err(ParseError::HeaderNotFirst(1))));
    }

    #[test]
    fn duplicate_header_fails() {
        let data = format!("{}\n{}", minimal_tree_file(), minimal_tree_file());
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(result, Err(ParseError::DuplicateHeader(2))));
    }

    #[test]
    fn unknown_record_type_fails() {
        let data = format!("{}\n{}", minimal_tree_file(), r#"{"type":"dso","id":1}"#);
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::UnknownRecordType(t, 2)) if t == "dso"
        ));
    }

    #[test]
    fn invalid_frame_reference_fails() {
        let data = format!(
            "{}\n{}\n{}\n{}",
            minimal_tree_file(),
            r#"{"type":"thread","id":"7","name":"main-7","total":1}"#,
            r#"{"type":"node","id":1,"thread":"7","parent":null,"frame":null,"total":1,"self":0}"#,
            r#"{"type":"node","id":2,"thread":"7","parent":1,"frame":42,"total":1,"self":1}"#
        );
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::InvalidFrameReference {
                node_id: 2,
                frame_id: 42
            })
        ));
    }

    #[test]
    fn child_before_parent_fails() {
        let data = format!(
            "{}\n{}\n{}\n{}",
            minimal_tree_file(),
            r#"{"type":"frame","id":1,"name":"main"}"#,
            r#"{"type":"thread","id":"7","name":"main-7"}"#,
            r#"{"type":"node","id":2,"thread":"7","parent":1,"frame":1,"total":1,"self":1}"#
        );
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::InvalidParentReference {
                node_id: 2,
                parent_id: 1
            })
        ));
    }

    #[test]
    fn unknown_thread_fails() {
        let data = format!(
            "{}\n{}",
            minimal_tree_file(),
            r#"{"type":"node","id":1,"thread":"7","total":1}"#
        );
        let result = TreeFile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::InvalidThreadReference { node_id: 1, thread }) if thread == "7"
        ));
    }

    #[test]
    fn skips_empty_lines() {
        let data = format!("{}\n\n\n", minimal_tree_file());
        assert!(TreeFile::parse(Cursor::new(data)).is_ok());
    }
}
