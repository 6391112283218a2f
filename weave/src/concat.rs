//! The message-concat contract and the registry that backs stream→value
//! adaptation.
//!
//! A registered concat function is required per element type; adaptation
//! must error rather than silently lose chunks when no concat function is
//! registered for the type in play. A static trait bound can't express
//! "registered or not" at runtime, so concat functions live in a
//! `TypeId`-keyed registry instead, the same way the engine's
//! field-mapping transformers (`graph::edge::Transformer`) are looked up
//! by type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::WeaveError;
use crate::value::AnyBox;

type ConcatFn = Arc<dyn Fn(Vec<AnyBox>) -> Result<AnyBox, WeaveError> + Send + Sync>;

/// Per-`TypeId` table of concat functions. A run's [`crate::context::RunContext`]
/// starts from [`ConcatRegistry::with_builtins`] and callers may register
/// additional element types before running.
#[derive(Clone)]
pub struct ConcatRegistry {
    fns: HashMap<TypeId, ConcatFn>,
}

impl Default for ConcatRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ConcatRegistry {
    pub fn empty() -> Self {
        ConcatRegistry {
            fns: HashMap::new(),
        }
    }

    /// Registers built-in concat support for `String` (plain append) and
    /// [`ChatMessageChunk`] (the richer rules below).
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register::<String, _>(|chunks| Ok(chunks.concat()));
        reg.register::<ChatMessageChunk, _>(concat_chat_message_chunks);
        reg
    }

    pub fn register<T, F>(&mut self, f: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Vec<T>) -> Result<T, WeaveError> + Send + Sync + 'static,
    {
        let erased: ConcatFn = Arc::new(move |items: Vec<AnyBox>| {
            let typed: Vec<T> = items
                .into_iter()
                .map(|b| {
                    b.downcast_ref::<T>()
                        .cloned()
                        .expect("concat registry type mismatch")
                })
                .collect();
            let result = f(typed)?;
            Ok(Arc::new(result) as AnyBox)
        });
        self.fns.insert(TypeId::of::<T>(), erased);
    }

    pub fn is_registered(&self, id: TypeId) -> bool {
        self.fns.contains_key(&id)
    }

    /// Applies the registered concat function for `id`'s type. `type_name`
    /// is used only for the error message when nothing is registered.
    pub fn concat_erased(
        &self,
        id: TypeId,
        type_name: &str,
        items: Vec<AnyBox>,
    ) -> Result<AnyBox, WeaveError> {
        let f = self
            .fns
            .get(&id)
            .ok_or_else(|| WeaveError::NoConcatFn(type_name.to_string()))?;
        f(items)
    }
}

/// One chunk of a streamed chat message. Field vocabulary grounded on the
/// teacher's `openai_sse` chunk/usage/tool-call types
/// (`ChatCompletionChunk`, `ChunkUsage`, `DeltaToolCall`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatMessageChunk {
    pub role: Option<String>,
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallChunk>,
    pub finish_reason: Option<String>,
    pub usage: Option<ChunkUsage>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ChunkUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChunkUsage {
    fn elementwise_max(a: ChunkUsage, b: ChunkUsage) -> ChunkUsage {
        ChunkUsage {
            prompt_tokens: a.prompt_tokens.max(b.prompt_tokens),
            completion_tokens: a.completion_tokens.max(b.completion_tokens),
            total_tokens: a.total_tokens.max(b.total_tokens),
        }
    }
}

/// Implements §6.4's chat-message concat rules: roles must agree, text and
/// reasoning are appended, tool-call chunks sharing an index are merged
/// (id/type/name must agree where present, arguments are appended),
/// finish-reason takes the last non-empty value, usage fields take the
/// element-wise maximum.
fn concat_chat_message_chunks(chunks: Vec<ChatMessageChunk>) -> Result<ChatMessageChunk, WeaveError> {
    let mut out = ChatMessageChunk::default();
    let mut tool_calls: Vec<ToolCallChunk> = Vec::new();

    for chunk in chunks {
        if let Some(role) = chunk.role {
            match &out.role {
                Some(existing) if existing != &role => {
                    return Err(WeaveError::ConcatFailed(format!(
                        "role mismatch: '{existing}' vs '{role}'"
                    )));
                }
                _ => out.role = Some(role),
            }
        }
        out.content.push_str(&chunk.content);
        out.reasoning.push_str(&chunk.reasoning);
        if let Some(fr) = chunk.finish_reason {
            if !fr.is_empty() {
                out.finish_reason = Some(fr);
            }
        }
        if let Some(usage) = chunk.usage {
            out.usage = Some(match out.usage {
                Some(existing) => ChunkUsage::elementwise_max(existing, usage),
                None => usage,
            });
        }
        for tc in chunk.tool_calls {
            match tool_calls.iter_mut().find(|t| t.index == tc.index) {
                Some(existing) => {
                    merge_tool_call(existing, tc)?;
                }
                None => tool_calls.push(tc),
            }
        }
    }
    out.tool_calls = tool_calls;
    Ok(out)
}

fn merge_tool_call(existing: &mut ToolCallChunk, incoming: ToolCallChunk) -> Result<(), WeaveError> {
    if let Some(id) = incoming.id {
        match &existing.id {
            Some(e) if e != &id => {
                return Err(WeaveError::ConcatFailed(format!(
                    "tool_call[{}] id mismatch: '{e}' vs '{id}'",
                    existing.index
                )))
            }
            _ => existing.id = Some(id),
        }
    }
    if let Some(kind) = incoming.kind {
        match &existing.kind {
            Some(e) if e != &kind => {
                return Err(WeaveError::ConcatFailed(format!(
                    "tool_call[{}] type mismatch: '{e}' vs '{kind}'",
                    existing.index
                )))
            }
            _ => existing.kind = Some(kind),
        }
    }
    if let Some(name) = incoming.name {
        match &existing.name {
            Some(e) if e != &name => {
                return Err(WeaveError::ConcatFailed(format!(
                    "tool_call[{}] function-name mismatch: '{e}' vs '{name}'",
                    existing.index
                )))
            }
            _ => existing.name = Some(name),
        }
    }
    existing.arguments.push_str(&incoming.arguments);
    Ok(())
}
