// src/services/core/infrastructure/chaos_engineering/experiment_method.rs

//! Experiment methods and the handle they configure
//!
//! Each container type declares a static table of [`MethodSpec`]s. Binding
//! the table to a live container yields [`ExperimentMethod`]s the selector can
//! choose from. Invoking a method injects the failure and registers the
//! health-check, self-healing and finalize callbacks on the
//! [`ExperimentHandle`] the experiment drives afterwards.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Duration;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContainerHealth, ExperimentType};
use crate::utils::error::{ChaosError, ChaosResult};

pub const DEFAULT_MINIMUM_DURATION_SECONDS: u64 = 30;
pub const DEFAULT_MAXIMUM_DURATION_SECONDS: u64 = 300;

pub type HealthCheckFn =
    Arc<dyn Fn() -> BoxFuture<'static, ChaosResult<ContainerHealth>> + Send + Sync>;
pub type CallbackFn = Arc<dyn Fn() -> BoxFuture<'static, ChaosResult<()>> + Send + Sync>;
pub type MethodInvoker =
    Arc<dyn Fn(ExperimentHandle) -> BoxFuture<'static, ChaosResult<()>> + Send + Sync>;

/// Metadata declared for one disruptive capability of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentMethodDescriptor {
    pub name: String,
    pub experiment_type: ExperimentType,
    pub minimum_duration_seconds: Option<u64>,
    pub maximum_duration_seconds: Option<u64>,
    /// Only run against containers that can be replaced
    pub ephemeral_only: bool,
}

impl ExperimentMethodDescriptor {
    pub fn new(name: impl Into<String>, experiment_type: ExperimentType) -> Self {
        Self {
            name: name.into(),
            experiment_type,
            minimum_duration_seconds: None,
            maximum_duration_seconds: None,
            ephemeral_only: false,
        }
    }

    pub fn with_minimum_duration(mut self, seconds: u64) -> Self {
        self.minimum_duration_seconds = Some(seconds);
        self
    }

    pub fn with_maximum_duration(mut self, seconds: u64) -> Self {
        self.maximum_duration_seconds = Some(seconds);
        self
    }

    pub fn ephemeral_only(mut self) -> Self {
        self.ephemeral_only = true;
        self
    }

    pub fn minimum_duration(&self) -> Duration {
        Duration::seconds(
            self.minimum_duration_seconds
                .unwrap_or(DEFAULT_MINIMUM_DURATION_SECONDS) as i64,
        )
    }

    pub fn maximum_duration(&self) -> Duration {
        Duration::seconds(
            self.maximum_duration_seconds
                .unwrap_or(DEFAULT_MAXIMUM_DURATION_SECONDS) as i64,
        )
    }

    pub fn validate(&self) -> ChaosResult<()> {
        if self.name.trim().is_empty() {
            return Err(ChaosError::validation_error("Experiment method needs a name"));
        }
        if self.minimum_duration() > self.maximum_duration() {
            return Err(ChaosError::validation_error(format!(
                "Experiment method {} has minimum duration {}s above maximum {}s",
                self.name,
                self.minimum_duration().num_seconds(),
                self.maximum_duration().num_seconds()
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct HandleSlots {
    health_check: Option<HealthCheckFn>,
    self_healing: Option<CallbackFn>,
    finalize: Option<CallbackFn>,
    minimum_duration: Option<Duration>,
    maximum_duration: Option<Duration>,
    finalization_duration: Option<Duration>,
}

/// Handed to a method invocation so it can register its callbacks.
#[derive(Clone)]
pub struct ExperimentHandle {
    experiment_id: Uuid,
    method_name: Arc<str>,
    slots: Arc<Mutex<HandleSlots>>,
}

impl ExperimentHandle {
    pub fn new(experiment_id: Uuid, method_name: &str) -> Self {
        Self {
            experiment_id,
            method_name: Arc::from(method_name),
            slots: Arc::new(Mutex::new(HandleSlots::default())),
        }
    }

    pub fn experiment_id(&self) -> Uuid {
        self.experiment_id
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut HandleSlots) -> R) -> R {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut slots)
    }

    pub fn set_health_check<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChaosResult<ContainerHealth>> + Send + 'static,
    {
        let check: HealthCheckFn =
            Arc::new(move || -> BoxFuture<'static, ChaosResult<ContainerHealth>> {
                Box::pin(check())
            });
        self.with_slots(|slots| slots.health_check = Some(check));
    }

    pub fn set_self_healing<F, Fut>(&self, heal: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChaosResult<()>> + Send + 'static,
    {
        let heal: CallbackFn =
            Arc::new(move || -> BoxFuture<'static, ChaosResult<()>> { Box::pin(heal()) });
        self.with_slots(|slots| slots.self_healing = Some(heal));
    }

    pub fn set_finalize<F, Fut>(&self, finalize: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChaosResult<()>> + Send + 'static,
    {
        let finalize: CallbackFn =
            Arc::new(move || -> BoxFuture<'static, ChaosResult<()>> { Box::pin(finalize()) });
        self.with_slots(|slots| slots.finalize = Some(finalize));
    }

    pub fn set_minimum_duration(&self, duration: Duration) {
        self.with_slots(|slots| slots.minimum_duration = Some(duration));
    }

    pub fn set_maximum_duration(&self, duration: Duration) {
        self.with_slots(|slots| slots.maximum_duration = Some(duration));
    }

    pub fn set_finalization_duration(&self, duration: Duration) {
        self.with_slots(|slots| slots.finalization_duration = Some(duration));
    }

    pub(crate) fn health_check(&self) -> Option<HealthCheckFn> {
        self.with_slots(|slots| slots.health_check.clone())
    }

    pub(crate) fn self_healing(&self) -> Option<CallbackFn> {
        self.with_slots(|slots| slots.self_healing.clone())
    }

    pub(crate) fn finalize(&self) -> Option<CallbackFn> {
        self.with_slots(|slots| slots.finalize.clone())
    }

    pub(crate) fn duration_overrides(&self) -> (Option<Duration>, Option<Duration>, Option<Duration>) {
        self.with_slots(|slots| {
            (
                slots.minimum_duration,
                slots.maximum_duration,
                slots.finalization_duration,
            )
        })
    }
}

impl fmt::Debug for ExperimentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentHandle")
            .field("experiment_id", &self.experiment_id)
            .field("method_name", &self.method_name)
            .finish()
    }
}

/// A descriptor bound to a live container
#[derive(Clone)]
pub struct ExperimentMethod {
    descriptor: ExperimentMethodDescriptor,
    invoker: MethodInvoker,
}

impl ExperimentMethod {
    pub fn new<F, Fut>(descriptor: ExperimentMethodDescriptor, invoke: F) -> Self
    where
        F: Fn(ExperimentHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChaosResult<()>> + Send + 'static,
    {
        Self {
            descriptor,
            invoker: Arc::new(
                move |handle: ExperimentHandle| -> BoxFuture<'static, ChaosResult<()>> {
                    Box::pin(invoke(handle))
                },
            ),
        }
    }

    pub fn descriptor(&self) -> &ExperimentMethodDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn experiment_type(&self) -> ExperimentType {
        self.descriptor.experiment_type
    }

    pub fn invoke(&self, handle: ExperimentHandle) -> BoxFuture<'static, ChaosResult<()>> {
        (self.invoker)(handle)
    }
}

impl fmt::Debug for ExperimentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentMethod")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Static table entry declaring one method of container type `C`
pub struct MethodSpec<C: 'static> {
    pub name: &'static str,
    pub experiment_type: ExperimentType,
    pub minimum_duration_seconds: Option<u64>,
    pub maximum_duration_seconds: Option<u64>,
    pub ephemeral_only: bool,
    pub invoke: fn(Arc<C>, ExperimentHandle) -> BoxFuture<'static, ChaosResult<()>>,
}

impl<C: 'static> MethodSpec<C> {
    pub fn descriptor(&self) -> ExperimentMethodDescriptor {
        ExperimentMethodDescriptor {
            name: self.name.to_string(),
            experiment_type: self.experiment_type,
            minimum_duration_seconds: self.minimum_duration_seconds,
            maximum_duration_seconds: self.maximum_duration_seconds,
            ephemeral_only: self.ephemeral_only,
        }
    }
}

/// Bind a method table to `container`. Invalid entries are logged and skipped.
///
/// The bound methods only hold a weak reference; invoking one after the
/// container is gone fails instead of keeping it alive.
pub fn bind_methods<C>(container: &Arc<C>, specs: &[MethodSpec<C>]) -> Vec<ExperimentMethod>
where
    C: Send + Sync + 'static,
{
    specs
        .iter()
        .filter_map(|spec| {
            let descriptor = spec.descriptor();
            if let Err(e) = descriptor.validate() {
                log::error!("Skipping experiment method {}: {}", spec.name, e);
                return None;
            }

            let target: Weak<C> = Arc::downgrade(container);
            let invoke = spec.invoke;
            let invoker: MethodInvoker = Arc::new(
                move |handle: ExperimentHandle| -> BoxFuture<'static, ChaosResult<()>> {
                    match target.upgrade() {
                        Some(container) => invoke(container, handle),
                        None => Box::pin(async {
                            Err(ChaosError::not_found("Container no longer exists"))
                        }),
                    }
                },
            );
            Some(ExperimentMethod {
                descriptor,
                invoker,
            })
        })
        .collect()
}
