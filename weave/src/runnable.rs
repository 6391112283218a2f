//! Runnable: the four-method contract and its automatic adaptation.
//!
//! A node author builds a [`Runnable`] from exactly one of the four
//! constructors (`from_invoke`, `from_stream`, `from_collect`,
//! `from_transform`); the engine derives the other three. Rust has no way
//! to ask "did the user override this default method", so — unlike the
//! teacher's `Node::run`/`run_with_context` pair, where the default method
//! is a real fallback — adaptation here is implemented once, centrally, by
//! matching on which single implementation was supplied.

use std::any::TypeId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::concat::ConcatRegistry;
use crate::context::RunContext;
use crate::error::WeaveError;
use crate::stream::Stream;
use crate::value::{AnyBox, Envelope, TypeTag};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type InvokeFn<S, I, O> =
    Arc<dyn Fn(RunContext<S>, I) -> BoxFuture<'static, Result<O, WeaveError>> + Send + Sync>;
type StreamFn<S, I, O> = Arc<
    dyn Fn(RunContext<S>, I) -> BoxFuture<'static, Result<Stream<O>, WeaveError>> + Send + Sync,
>;
type CollectFn<S, I, O> = Arc<
    dyn Fn(RunContext<S>, Stream<I>) -> BoxFuture<'static, Result<O, WeaveError>> + Send + Sync,
>;
type TransformFn<S, I, O> = Arc<
    dyn Fn(RunContext<S>, Stream<I>) -> BoxFuture<'static, Result<Stream<O>, WeaveError>>
        + Send
        + Sync,
>;

enum Implementation<S, I, O> {
    Invoke(InvokeFn<S, I, O>),
    Stream(StreamFn<S, I, O>),
    Collect(CollectFn<S, I, O>),
    Transform(TransformFn<S, I, O>),
}

/// A typed node executor implementing exactly one of invoke/stream/
/// collect/transform; the other three are derived by the adaptation
/// rules above.
pub struct Runnable<S, I, O> {
    imp: Implementation<S, I, O>,
    input_type: TypeTag,
    output_type: TypeTag,
}

impl<S, I, O> Runnable<S, I, O>
where
    S: Send + Sync + 'static,
    I: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
    O: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    pub fn from_invoke<F, Fut>(f: F) -> Self
    where
        F: Fn(RunContext<S>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WeaveError>> + Send + 'static,
    {
        Runnable {
            imp: Implementation::Invoke(Arc::new(move |ctx, i| Box::pin(f(ctx, i)))),
            input_type: TypeTag::of::<I>(),
            output_type: TypeTag::of::<O>(),
        }
    }

    pub fn from_stream<F, Fut>(f: F) -> Self
    where
        F: Fn(RunContext<S>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Stream<O>, WeaveError>> + Send + 'static,
    {
        Runnable {
            imp: Implementation::Stream(Arc::new(move |ctx, i| Box::pin(f(ctx, i)))),
            input_type: TypeTag::of::<I>(),
            output_type: TypeTag::of::<O>(),
        }
    }

    pub fn from_collect<F, Fut>(f: F) -> Self
    where
        F: Fn(RunContext<S>, Stream<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WeaveError>> + Send + 'static,
    {
        Runnable {
            imp: Implementation::Collect(Arc::new(move |ctx, i| Box::pin(f(ctx, i)))),
            input_type: TypeTag::of::<I>(),
            output_type: TypeTag::of::<O>(),
        }
    }

    pub fn from_transform<F, Fut>(f: F) -> Self
    where
        F: Fn(RunContext<S>, Stream<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Stream<O>, WeaveError>> + Send + 'static,
    {
        Runnable {
            imp: Implementation::Transform(Arc::new(move |ctx, i| Box::pin(f(ctx, i)))),
            input_type: TypeTag::of::<I>(),
            output_type: TypeTag::of::<O>(),
        }
    }

    pub fn input_type(&self) -> &TypeTag {
        &self.input_type
    }
    pub fn output_type(&self) -> &TypeTag {
        &self.output_type
    }

    async fn drain_to_value(
        concat: &ConcatRegistry,
        mut stream: Stream<I>,
    ) -> Result<I, WeaveError> {
        let type_id = TypeId::of::<I>();
        let type_name = std::any::type_name::<I>();
        let mut items = Vec::new();
        loop {
            match stream.next().await {
                crate::stream::Next::Value(v) => items.push(v),
                crate::stream::Next::End => break,
                crate::stream::Next::Error(e) => return Err(e),
            }
        }
        if items.len() == 1 {
            return Ok(items.pop().expect("checked len == 1"));
        }
        let boxed: Vec<AnyBox> = items.into_iter().map(|v| Arc::new(v) as AnyBox).collect();
        let result = concat.concat_erased(type_id, type_name, boxed)?;
        result
            .downcast_ref::<I>()
            .cloned()
            .ok_or_else(|| WeaveError::ConcatFailed(format!("concat fn for {type_name} returned wrong type")))
    }

    async fn drain_output_to_value(
        concat: &ConcatRegistry,
        mut stream: Stream<O>,
    ) -> Result<O, WeaveError> {
        let type_id = TypeId::of::<O>();
        let type_name = std::any::type_name::<O>();
        let mut items = Vec::new();
        loop {
            match stream.next().await {
                crate::stream::Next::Value(v) => items.push(v),
                crate::stream::Next::End => break,
                crate::stream::Next::Error(e) => return Err(e),
            }
        }
        if items.len() == 1 {
            return Ok(items.pop().expect("checked len == 1"));
        }
        let boxed: Vec<AnyBox> = items.into_iter().map(|v| Arc::new(v) as AnyBox).collect();
        let result = concat.concat_erased(type_id, type_name, boxed)?;
        result
            .downcast_ref::<O>()
            .cloned()
            .ok_or_else(|| WeaveError::ConcatFailed(format!("concat fn for {type_name} returned wrong type")))
    }

    pub async fn invoke(&self, ctx: RunContext<S>, input: I) -> Result<O, WeaveError> {
        match &self.imp {
            Implementation::Invoke(f) => f(ctx, input).await,
            Implementation::Stream(f) => {
                let s = f(ctx.clone(), input).await?;
                Self::drain_output_to_value(&ctx.concat, s).await
            }
            Implementation::Collect(f) => f(ctx, Stream::once(input)).await,
            Implementation::Transform(f) => {
                let s = f(ctx.clone(), Stream::once(input)).await?;
                Self::drain_output_to_value(&ctx.concat, s).await
            }
        }
    }

    pub async fn stream(&self, ctx: RunContext<S>, input: I) -> Result<Stream<O>, WeaveError> {
        match &self.imp {
            Implementation::Invoke(f) => {
                let o = f(ctx, input).await?;
                Ok(Stream::once(o))
            }
            Implementation::Stream(f) => f(ctx, input).await,
            Implementation::Collect(f) => {
                let o = f(ctx, Stream::once(input)).await?;
                Ok(Stream::once(o))
            }
            Implementation::Transform(f) => f(ctx, Stream::once(input)).await,
        }
    }

    pub async fn collect(&self, ctx: RunContext<S>, input: Stream<I>) -> Result<O, WeaveError> {
        match &self.imp {
            Implementation::Invoke(f) => {
                let v = Self::drain_to_value(&ctx.concat, input).await?;
                f(ctx, v).await
            }
            Implementation::Stream(f) => {
                let v = Self::drain_to_value(&ctx.concat, input).await?;
                let s = f(ctx.clone(), v).await?;
                Self::drain_output_to_value(&ctx.concat, s).await
            }
            Implementation::Collect(f) => f(ctx, input).await,
            Implementation::Transform(f) => {
                let s = f(ctx.clone(), input).await?;
                Self::drain_output_to_value(&ctx.concat, s).await
            }
        }
    }

    pub async fn transform(
        &self,
        ctx: RunContext<S>,
        input: Stream<I>,
    ) -> Result<Stream<O>, WeaveError> {
        match &self.imp {
            Implementation::Invoke(f) => {
                let v = Self::drain_to_value(&ctx.concat, input).await?;
                let o = f(ctx, v).await?;
                Ok(Stream::once(o))
            }
            Implementation::Stream(f) => {
                let v = Self::drain_to_value(&ctx.concat, input).await?;
                f(ctx, v).await
            }
            Implementation::Collect(f) => {
                let o = f(ctx, input).await?;
                Ok(Stream::once(o))
            }
            Implementation::Transform(f) => f(ctx, input).await,
        }
    }
}

/// Type-erased form of [`Runnable`], stored by the graph IR so nodes of
/// different `I`/`O` can live in the same `nodes[]` arena. Operates on
/// [`Envelope`] and decides at runtime whether to call the value or
/// stream path based on the envelope it receives.
#[async_trait]
pub trait ErasedRunnable<S>: Send + Sync {
    async fn invoke(&self, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>;
    async fn stream(&self, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>;
    fn input_type(&self) -> &TypeTag;
    fn output_type(&self) -> &TypeTag;

    /// Renders a value envelope of this node's output type as JSON, for
    /// field-mapping extraction and checkpoint persistence. Every node's
    /// I/O is required to be (de)serializable precisely so this bridge
    /// always succeeds for a value-shaped envelope of the right type.
    fn output_to_json(&self, env: &Envelope) -> Result<serde_json::Value, WeaveError>;

    /// Builds a value envelope of this node's input type from JSON, the
    /// inverse of [`ErasedRunnable::output_to_json`] used after a
    /// [`crate::graph::edge::FieldMapping`] has composed a fresh input.
    fn input_from_json(&self, json: serde_json::Value) -> Result<Envelope, WeaveError>;
}

#[async_trait]
impl<S, I, O> ErasedRunnable<S> for Runnable<S, I, O>
where
    S: Send + Sync + 'static,
    I: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
    O: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    async fn invoke(&self, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError> {
        let out = if input.is_stream() {
            let stream = input.into_stream::<I>()?;
            Runnable::collect(self, ctx, stream).await?
        } else {
            let value = input.as_value::<I>()?;
            Runnable::invoke(self, ctx, value).await?
        };
        Ok(Envelope::from_value(out))
    }

    async fn stream(&self, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError> {
        let out = if input.is_stream() {
            let stream = input.into_stream::<I>()?;
            Runnable::transform(self, ctx, stream).await?
        } else {
            let value = input.as_value::<I>()?;
            Runnable::stream(self, ctx, value).await?
        };
        Ok(Envelope::from_stream(out))
    }

    fn input_type(&self) -> &TypeTag {
        &self.input_type
    }

    fn output_type(&self) -> &TypeTag {
        &self.output_type
    }

    fn output_to_json(&self, env: &Envelope) -> Result<serde_json::Value, WeaveError> {
        let value = env.as_value::<O>()?;
        serde_json::to_value(value)
            .map_err(|e| WeaveError::SerializationFailed(e.to_string()))
    }

    fn input_from_json(&self, json: serde_json::Value) -> Result<Envelope, WeaveError> {
        let value: I = serde_json::from_value(json)
            .map_err(|e| WeaveError::SerializationFailed(e.to_string()))?;
        Ok(Envelope::from_value(value))
    }
}
