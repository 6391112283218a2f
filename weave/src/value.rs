//! The value envelope: a type-erased carrier that preserves whether a
//! payload is a single value or a stream, plus its element type.
//!
//! A tagged sum `{value | stream}` with an element-type tag rather than a
//! bare opaque pointer, so adaptation between a node's four calling forms
//! can always tell which shape it's holding and convert correctly.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::WeaveError;
use crate::stream::Stream;

/// An element-type tag: the `TypeId` plus a human-readable name for error
/// messages. Two tags are equal iff they describe the same concrete type.
#[derive(Clone)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        TypeTag {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

/// A type-erased stream element: any `T: Send + Sync + 'static` boxed
/// behind `Any`. `Envelope::Stream` always carries this erased form; the
/// typed `Stream<T>` used at `Runnable` boundaries is converted to/from it
/// at the edges of the erased graph engine.
pub type AnyBox = Arc<dyn Any + Send + Sync>;

/// Converts a boxed value back to JSON without the caller needing to know
/// its concrete type. Built once, at the point a concrete `T` is in scope
/// (`Envelope::from_value`), and carried alongside the box from then on —
/// the only way a type-erased envelope can still serialize itself once its
/// owning node has gone out of scope (e.g. the graph's own virtual `START`
/// pseudo-node, which has no [`crate::runnable::ErasedRunnable`] to ask).
type ToJsonFn = Arc<dyn Fn(&AnyBox) -> Result<serde_json::Value, WeaveError> + Send + Sync>;

/// Tagged union `{ValueOf(T), StreamOf(T)}` carrying the element type.
pub enum Envelope {
    Value(AnyBox, TypeTag, ToJsonFn),
    Stream(Stream<AnyBox>, TypeTag),
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Value(_, tag, _) => write!(f, "Envelope::Value({})", tag.name()),
            Envelope::Stream(_, tag) => write!(f, "Envelope::Stream({})", tag.name()),
        }
    }
}

impl Envelope {
    pub fn from_value<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        let to_json: ToJsonFn = Arc::new(|boxed: &AnyBox| {
            let v = boxed
                .downcast_ref::<T>()
                .expect("to_json closure's T always matches its envelope's own TypeTag");
            serde_json::to_value(v).map_err(|e| WeaveError::SerializationFailed(e.to_string()))
        });
        Envelope::Value(Arc::new(value), TypeTag::of::<T>(), to_json)
    }

    /// Wraps a typed stream into its erased form by forwarding each
    /// element through `Arc::new` on a background task.
    pub fn from_stream<T: Send + Sync + 'static>(mut stream: Stream<T>) -> Self {
        let tag = TypeTag::of::<T>();
        let (tx, erased) = Stream::<AnyBox>::channel();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    crate::stream::Next::Value(v) => {
                        let boxed: AnyBox = Arc::new(v);
                        if tx.send(boxed).await == crate::stream::SendStatus::Closed {
                            break;
                        }
                    }
                    crate::stream::Next::Error(e) => {
                        let _ = tx.send_error(e).await;
                        break;
                    }
                    crate::stream::Next::End => break,
                }
            }
        });
        Envelope::Stream(erased, tag)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Envelope::Stream(..))
    }

    pub fn type_tag(&self) -> &TypeTag {
        match self {
            Envelope::Value(_, tag, _) => tag,
            Envelope::Stream(_, tag) => tag,
        }
    }

    /// Converts a value envelope to JSON using the closure captured when it
    /// was built, without the caller needing to know its concrete type.
    /// Used by field-mapped edge composition for deliveries whose source
    /// is the virtual `START` node, which has no runnable of its own to
    /// ask.
    pub(crate) fn to_json(&self) -> Result<serde_json::Value, WeaveError> {
        match self {
            Envelope::Value(v, _, f) => f(v),
            Envelope::Stream(_, tag) => Err(WeaveError::TypeTagMismatch {
                expected: "value".to_string(),
                found: format!("stream of {}", tag.name()),
            }),
        }
    }

    /// The envelope's own `to_json` closure, reusable when rebuilding a new
    /// envelope of the same concrete type (e.g. a concat-merged value at
    /// the graph boundary).
    pub(crate) fn to_json_fn(&self) -> Option<ToJsonFn> {
        match self {
            Envelope::Value(_, _, f) => Some(f.clone()),
            Envelope::Stream(..) => None,
        }
    }

    pub fn get_type(&self) -> &'static str {
        self.type_tag().name()
    }

    /// Unpacks a value envelope as `T`. Fails with a type-tag mismatch if
    /// the envelope holds a different element type, or if it is a stream.
    pub fn as_value<T: Clone + Send + Sync + 'static>(&self) -> Result<T, WeaveError> {
        match self {
            Envelope::Value(v, tag, _) => {
                if tag.id() != TypeId::of::<T>() {
                    return Err(WeaveError::TypeTagMismatch {
                        expected: std::any::type_name::<T>().to_string(),
                        found: tag.name().to_string(),
                    });
                }
                v.downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| WeaveError::TypeTagMismatch {
                        expected: std::any::type_name::<T>().to_string(),
                        found: tag.name().to_string(),
                    })
            }
            Envelope::Stream(_, tag) => Err(WeaveError::TypeTagMismatch {
                expected: format!("value of {}", std::any::type_name::<T>()),
                found: format!("stream of {}", tag.name()),
            }),
        }
    }

    /// Unpacks a stream envelope as `Stream<T>`, downcasting each element
    /// as it is pulled.
    pub fn into_stream<T: Clone + Send + Sync + 'static>(self) -> Result<Stream<T>, WeaveError> {
        match self {
            Envelope::Stream(mut erased, tag) => {
                if tag.id() != TypeId::of::<T>() {
                    return Err(WeaveError::TypeTagMismatch {
                        expected: std::any::type_name::<T>().to_string(),
                        found: tag.name().to_string(),
                    });
                }
                let (tx, typed) = Stream::<T>::channel();
                tokio::spawn(async move {
                    loop {
                        match erased.next().await {
                            crate::stream::Next::Value(v) => match v.downcast_ref::<T>() {
                                Some(t) => {
                                    if tx.send(t.clone()).await
                                        == crate::stream::SendStatus::Closed
                                    {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            crate::stream::Next::Error(e) => {
                                let _ = tx.send_error(e).await;
                                break;
                            }
                            crate::stream::Next::End => break,
                        }
                    }
                });
                Ok(typed)
            }
            Envelope::Value(_, tag, _) => Err(WeaveError::TypeTagMismatch {
                expected: format!("stream of {}", std::any::type_name::<T>()),
                found: format!("value of {}", tag.name()),
            }),
        }
    }

    /// Unpacks a value envelope's boxed form without knowing its concrete
    /// type, for type-erased concat merging at the graph boundary —
    /// adaptation applied across multiple top-level inputs rather than a
    /// single node.
    pub fn as_value_erased(&self) -> Result<AnyBox, WeaveError> {
        match self {
            Envelope::Value(v, _, _) => Ok(v.clone()),
            Envelope::Stream(_, tag) => Err(WeaveError::TypeTagMismatch {
                expected: "value".to_string(),
                found: format!("stream of {}", tag.name()),
            }),
        }
    }

    /// Rebuilds a value envelope from an already-boxed value, its tag, and
    /// a `to_json` closure borrowed from one of the values it was built
    /// from (valid because concat merges never change a value's concrete
    /// type), the inverse of [`Envelope::as_value_erased`].
    pub(crate) fn from_erased_value(value: AnyBox, tag: TypeTag, to_json: ToJsonFn) -> Self {
        Envelope::Value(value, tag, to_json)
    }

    /// Splits this envelope into `n` independent copies for delivery down
    /// multiple outgoing edges — a node's output fans out to every
    /// successor edge unchanged. A value envelope's `Arc` is cheaply
    /// cloned; a stream envelope is split via [`Stream::copy`].
    pub fn fanout(self, n: usize) -> Vec<Envelope> {
        if n == 0 {
            return Vec::new();
        }
        match self {
            Envelope::Value(v, tag, f) => (0..n)
                .map(|_| Envelope::Value(v.clone(), tag.clone(), f.clone()))
                .collect(),
            Envelope::Stream(s, tag) => s
                .copy(n)
                .into_iter()
                .map(|copy| Envelope::Stream(copy, tag.clone()))
                .collect(),
        }
    }

    /// Coerces a value envelope into a one-element stream envelope of the
    /// same element type, leaving an already-streaming envelope
    /// unchanged. Used where a run collapsed to a single value but the
    /// caller asked for the graph's `Stream` form — the invoke-to-stream
    /// adaptation, applied at the whole-graph level.
    pub fn into_singleton_stream(self) -> Envelope {
        match self {
            Envelope::Stream(..) => self,
            Envelope::Value(v, tag, _) => {
                let erased = crate::stream::Stream::once(v);
                Envelope::Stream(erased, tag)
            }
        }
    }

    /// Releases the producer side of a stream envelope; a value envelope
    /// ignores this.
    pub fn close(self) {
        if let Envelope::Stream(mut s, _) = self {
            s.close();
        }
    }
}
