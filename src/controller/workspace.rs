//! Workspace reconciliation
//!
//! Each reconcile connects to Coder, observes the workspace, and takes at
//! most one converging step (create, update or delete). Status, the
//! connection secret and events are written back to Kubernetes afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

use super::connector::{Connecter, Connector, HttpClientFactory, KubeCredentialSource};
use super::external::{ConnectionDetails, ExternalClient, ExternalObservation};
use super::managed::Managed;
use super::ControllerConfig;
use crate::crd::{Condition, DeletionPolicy, SecretReference, Workspace, WorkspaceStatus};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::{Error, Result, CONTROLLER_NAME, EXTERNAL_NAME_ANNOTATION, FIELD_MANAGER, FINALIZER};

/// Secret type for published connection details
const CONNECTION_SECRET_TYPE: &str = "connection.crossplane.io/v1alpha1";

/// Kubernetes writes the Workspace controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Replace the status of a Workspace
    async fn patch_status(&self, name: &str, status: &WorkspaceStatus) -> Result<()>;

    /// Add the provider's finalizer to a Workspace
    async fn add_finalizer(&self, name: &str) -> Result<()>;

    /// Remove the provider's finalizer from a Workspace
    async fn remove_finalizer(&self, name: &str) -> Result<()>;

    /// Record the external name annotation on a Workspace
    async fn set_external_name(&self, name: &str, external_name: &str) -> Result<()>;

    /// Write connection details into the referenced Secret
    async fn publish_connection_details(
        &self,
        secret: &SecretReference,
        owner: Option<OwnerReference>,
        details: &ConnectionDetails,
    ) -> Result<()>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn workspaces(&self) -> Api<Workspace> {
        Api::all(self.client.clone())
    }

    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        self.workspaces()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(&self, name: &str, status: &WorkspaceStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.workspaces()
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, name: &str) -> Result<()> {
        let ws = self.workspaces().get(name).await?;
        let mut finalizers = ws.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(name, finalizers).await?;
        debug!(workspace = %name, "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str) -> Result<()> {
        let Some(ws) = self.workspaces().get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = ws
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != FINALIZER)
            .collect();
        self.patch_finalizers(name, finalizers).await?;
        debug!(workspace = %name, "removed finalizer");
        Ok(())
    }

    async fn set_external_name(&self, name: &str, external_name: &str) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": { "annotations": { EXTERNAL_NAME_ANNOTATION: external_name } }
        });
        self.workspaces()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn publish_connection_details(
        &self,
        secret: &SecretReference,
        owner: Option<OwnerReference>,
        details: &ConnectionDetails,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret.namespace);
        let owners: Vec<OwnerReference> = owner.into_iter().collect();
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": &secret.name,
                "namespace": &secret.namespace,
                "ownerReferences": owners,
            },
            "type": CONNECTION_SECRET_TYPE,
            "stringData": details,
        });
        api.patch(
            &secret.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&body),
        )
        .await?;
        Ok(())
    }
}

/// Shared state for every Workspace reconcile
///
/// Built once at startup with [`Context::builder`]. Nothing in here is
/// specific to one Workspace: credentials and Coder clients are created
/// per reconcile by the connector.
pub struct Context {
    /// Kubernetes writes (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Builds the external client for each reconcile
    pub connector: Arc<dyn Connecter>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Controller tunables
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from mocks, without a Kubernetes client
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        connector: Arc<dyn Connecter>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            connector,
            events,
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for [`Context`]
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(ControllerConfig { poll_interval: Duration::from_secs(30), ..Default::default() })
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    connector: Option<Arc<dyn Connecter>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            connector: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set controller tunables
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the connector
    pub fn connector(mut self, connector: Arc<dyn Connecter>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        let timeout = self.config.request_timeout;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(client.clone()))),
            connector: self.connector.unwrap_or_else(|| {
                Arc::new(Connector::new(
                    Arc::new(KubeCredentialSource::new(client.clone())),
                    Arc::new(HttpClientFactory::new(timeout)),
                ))
            }),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME))),
            config: self.config,
        }
    }
}

/// Reconcile a Workspace
#[instrument(skip(ws, ctx), fields(workspace = %ws.name_any()))]
pub async fn reconcile(ws: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    let managed = Managed::from(ws.clone());

    let result = if ws.meta().deletion_timestamp.is_some() {
        finalize(&ws, &managed, &ctx).await
    } else {
        converge(&ws, &managed, &ctx).await
    };

    if let Err(e) = &result {
        record_failure(&ws, &ctx, e).await;
    }
    result
}

/// Decide how to requeue after a failed reconcile
///
/// Retryable errors come back after a short delay. Permanent ones wait for
/// the Workspace to change; its `Synced` condition already explains why.
pub fn error_policy(ws: Arc<Workspace>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(workspace = %ws.name_any(), %error, "reconcile failed, retrying");
        Action::requeue(ctx.config.error_requeue)
    } else {
        warn!(workspace = %ws.name_any(), %error, "reconcile failed permanently");
        Action::await_change()
    }
}

async fn converge(ws: &Workspace, managed: &Managed, ctx: &Context) -> Result<Action> {
    let name = ws.name_any();
    if !has_finalizer(ws) {
        ctx.kube.add_finalizer(&name).await?;
    }

    let external = connect(ws, managed, ctx).await?;
    let observation = checked(
        ctx,
        ws,
        reasons::CANNOT_OBSERVE,
        actions::OBSERVE,
        external.observe(managed).await,
    )
    .await?;

    if !observation.resource_exists {
        let creation = checked(
            ctx,
            ws,
            reasons::CANNOT_CREATE,
            actions::CREATE,
            external.create(managed).await,
        )
        .await?;
        let ext = ws.external_name()?;
        info!(external_name = %ext, "created Coder workspace");
        emit(ctx, ws, EventType::Normal, reasons::CREATED, actions::CREATE, None).await;

        if !ws.has_external_name() {
            ctx.kube.set_external_name(&name, &ext.to_string()).await?;
        }
        publish_connection_details(ws, ctx, &creation.connection_details).await?;

        let status = current_status(ws)
            .with_condition(Condition::creating())
            .with_condition(Condition::reconcile_success());
        write_status(ws, ctx, status).await?;
        return Ok(Action::requeue(ctx.config.change_requeue));
    }

    if !observation.resource_up_to_date {
        let update = checked(
            ctx,
            ws,
            reasons::CANNOT_UPDATE,
            actions::UPDATE,
            external.update(managed).await,
        )
        .await?;
        info!("updated Coder workspace parameters");
        emit(ctx, ws, EventType::Normal, reasons::UPDATED, actions::UPDATE, None).await;
        publish_connection_details(ws, ctx, &update.connection_details).await?;
        write_status(ws, ctx, observed_status(ws, &observation)).await?;
        return Ok(Action::requeue(ctx.config.change_requeue));
    }

    debug!("Coder workspace is up to date");
    publish_connection_details(ws, ctx, &observation.connection_details).await?;
    write_status(ws, ctx, observed_status(ws, &observation)).await?;
    Ok(Action::requeue(ctx.config.poll_interval))
}

async fn finalize(ws: &Workspace, managed: &Managed, ctx: &Context) -> Result<Action> {
    let name = ws.name_any();
    if !has_finalizer(ws) {
        return Ok(Action::await_change());
    }

    if ws.spec.deletion_policy == DeletionPolicy::Orphan {
        info!("deletion policy is Orphan, leaving Coder workspace in place");
        ctx.kube.remove_finalizer(&name).await?;
        return Ok(Action::await_change());
    }

    let external = connect(ws, managed, ctx).await?;
    let observation = checked(
        ctx,
        ws,
        reasons::CANNOT_OBSERVE,
        actions::OBSERVE,
        external.observe(managed).await,
    )
    .await?;

    if observation.resource_exists {
        let already_deleting = observation
            .at_provider
            .as_ref()
            .is_some_and(|a| a.is_deleting());
        checked(
            ctx,
            ws,
            reasons::CANNOT_DELETE,
            actions::DELETE,
            external.delete(managed).await,
        )
        .await?;
        if !already_deleting {
            info!("deleting Coder workspace");
            emit(ctx, ws, EventType::Normal, reasons::DELETED, actions::DELETE, None).await;
        }

        let status = observed_status(ws, &observation).with_condition(Condition::deleting());
        write_status(ws, ctx, status).await?;
        return Ok(Action::requeue(ctx.config.change_requeue));
    }

    info!("Coder workspace is gone, removing finalizer");
    ctx.kube.remove_finalizer(&name).await?;
    Ok(Action::await_change())
}

async fn connect(
    ws: &Workspace,
    managed: &Managed,
    ctx: &Context,
) -> Result<Box<dyn ExternalClient>> {
    let result = ctx.connector.connect(managed).await;
    checked(ctx, ws, reasons::CANNOT_CONNECT, actions::CONNECT, result).await
}

/// Pass `result` through, emitting a warning event if it failed
async fn checked<T>(
    ctx: &Context,
    ws: &Workspace,
    reason: &str,
    action: &str,
    result: Result<T>,
) -> Result<T> {
    if let Err(e) = &result {
        emit(ctx, ws, EventType::Warning, reason, action, Some(e.to_string())).await;
    }
    result
}

async fn emit(
    ctx: &Context,
    ws: &Workspace,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&ws.object_ref(&()), type_, reason, action, note)
        .await;
}

async fn publish_connection_details(
    ws: &Workspace,
    ctx: &Context,
    details: &ConnectionDetails,
) -> Result<()> {
    let Some(secret) = ws.spec.write_connection_secret_to_ref.as_ref() else {
        return Ok(());
    };
    if details.is_empty() {
        return Ok(());
    }
    let result = ctx
        .kube
        .publish_connection_details(secret, ws.controller_owner_ref(&()), details)
        .await;
    checked(ctx, ws, reasons::CANNOT_PUBLISH, actions::PUBLISH, result).await
}

fn has_finalizer(ws: &Workspace) -> bool {
    ws.finalizers().iter().any(|f| f == FINALIZER)
}

fn current_status(ws: &Workspace) -> WorkspaceStatus {
    ws.status
        .clone()
        .unwrap_or_default()
        .with_observed_generation(ws.metadata.generation)
}

/// Status after a successful observe
fn observed_status(ws: &Workspace, observation: &ExternalObservation) -> WorkspaceStatus {
    let mut status = current_status(ws)
        .with_condition(ready_condition(observation))
        .with_condition(Condition::reconcile_success());
    if let Some(at_provider) = &observation.at_provider {
        status = status.with_observation(at_provider.clone());
    }
    status
}

/// Map the latest build status to the Ready condition
fn ready_condition(observation: &ExternalObservation) -> Condition {
    let Some(at_provider) = observation.at_provider.as_ref() else {
        return Condition::creating();
    };
    if at_provider.is_deleting() {
        return Condition::deleting();
    }
    match at_provider.latest_stat.as_str() {
        "running" => Condition::available(),
        "" | "pending" | "starting" => Condition::creating(),
        "deleting" => Condition::deleting(),
        other => Condition::unavailable(format!("latest build is {other}")),
    }
}

/// Patch status unless nothing but timestamps would change
async fn write_status(ws: &Workspace, ctx: &Context, status: WorkspaceStatus) -> Result<()> {
    if ws.status.as_ref().is_some_and(|s| s.same_state(&status)) {
        debug!("status unchanged, skipping patch");
        return Ok(());
    }
    ctx.kube.patch_status(&ws.name_any(), &status).await
}

async fn record_failure(ws: &Workspace, ctx: &Context, error: &Error) {
    let status = current_status(ws)
        .with_condition(Condition::reconcile_error(error.reason(), error.to_string()));
    if let Err(e) = write_status(ws, ctx, status).await {
        warn!(error = %e, "failed to record reconcile error on status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::connector::MockConnecter;
    use crate::controller::external::{ExternalCreation, ExternalUpdate, MockExternalClient};
    use crate::crd::{
        ConditionStatus, ProviderConfigReference, WorkspaceObservation, WorkspaceParameters,
        WorkspaceSpec, CONDITION_READY, CONDITION_SYNCED,
    };
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Mutex;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn sample_workspace(name: &str) -> Workspace {
        let mut ws = Workspace::new(
            name,
            WorkspaceSpec {
                for_provider: WorkspaceParameters {
                    username: "jane.doe".to_string(),
                    org_id: "org1".to_string(),
                    template: Some("base-image".to_string()),
                    ..Default::default()
                },
                provider_config_ref: ProviderConfigReference::default(),
                write_connection_secret_to_ref: None,
                deletion_policy: DeletionPolicy::Delete,
            },
        );
        ws.metadata.uid = Some(format!("uid-{name}"));
        ws.metadata.generation = Some(1);
        ws
    }

    fn with_finalizer(mut ws: Workspace) -> Workspace {
        ws.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        ws
    }

    fn being_deleted(ws: Workspace) -> Workspace {
        let mut ws = with_finalizer(ws);
        ws.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        ws
    }

    fn details() -> ConnectionDetails {
        ConnectionDetails::from([
            ("owner".to_string(), "janedoe".to_string()),
            ("workspace".to_string(), "dev".to_string()),
        ])
    }

    fn existing(up_to_date: bool, stat: &str) -> ExternalObservation {
        ExternalObservation {
            resource_exists: true,
            resource_up_to_date: up_to_date,
            connection_details: details(),
            at_provider: Some(WorkspaceObservation {
                workspace_id: Some("ws-1".to_string()),
                latest_stat: stat.to_string(),
                ..Default::default()
            }),
        }
    }

    fn deleting(stat: &str) -> ExternalObservation {
        let mut observation = existing(true, stat);
        if let Some(at_provider) = observation.at_provider.as_mut() {
            at_provider.latest_transition = "delete".to_string();
        }
        observation
    }

    fn connector_for(external: MockExternalClient) -> MockConnecter {
        let mut connector = MockConnecter::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_| Ok(Box::new(external) as Box<dyn ExternalClient>));
        connector
    }

    /// Captures status patches so tests can assert on conditions
    #[derive(Clone, Default)]
    struct StatusCapture {
        updates: Arc<Mutex<Vec<WorkspaceStatus>>>,
    }

    impl StatusCapture {
        fn install(&self, kube: &mut MockKubeClient) {
            let updates = self.updates.clone();
            kube.expect_patch_status().returning(move |_, status| {
                updates.lock().unwrap().push(status.clone());
                Ok(())
            });
        }

        fn last(&self) -> WorkspaceStatus {
            self.updates
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("status was patched")
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    /// Records event reasons in order
    #[derive(Clone, Default)]
    struct EventCapture {
        reasons: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventPublisher for EventCapture {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            _type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    impl EventCapture {
        fn reasons(&self) -> Vec<String> {
            self.reasons.lock().unwrap().clone()
        }
    }

    fn context(
        kube: MockKubeClient,
        connector: MockConnecter,
        events: &EventCapture,
    ) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(kube),
            Arc::new(connector),
            Arc::new(events.clone()),
        ))
    }

    fn condition(status: &WorkspaceStatus, type_: &str) -> Condition {
        status.condition(type_).cloned().expect("condition present")
    }

    // =========================================================================
    // Converge Stories
    // =========================================================================

    /// Story: a brand-new Workspace is applied
    ///
    /// The finalizer goes on first, the workspace is created in Coder, the
    /// external name is pinned, and status reports Creating.
    #[tokio::test]
    async fn story_new_workspace_is_created_and_named() {
        let ws = Arc::new(sample_workspace("dev"));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(ExternalObservation::absent()));
        external.expect_create().times(1).returning(|_| {
            Ok(ExternalCreation {
                connection_details: details(),
            })
        });
        external.expect_update().never();

        let mut kube = MockKubeClient::new();
        kube.expect_add_finalizer()
            .withf(|name| name == "dev")
            .times(1)
            .returning(|_| Ok(()));
        kube.expect_set_external_name()
            .withf(|name, ext| name == "dev" && ext == "janedoe/dev")
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_publish_connection_details().never();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let action = reconcile(ws, ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ctx.config.change_requeue));
        let status = statuses.last();
        assert_eq!(condition(&status, CONDITION_READY).reason, "Creating");
        assert_eq!(condition(&status, CONDITION_SYNCED).status, ConditionStatus::True);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(events.reasons(), vec![reasons::CREATED.to_string()]);
    }

    /// Story: the Workspace matches Coder
    #[tokio::test]
    async fn story_in_sync_workspace_is_ready_and_polled() {
        let ws = Arc::new(with_finalizer(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "running")));
        external.expect_create().never();
        external.expect_update().never();
        external.expect_delete().never();

        let mut kube = MockKubeClient::new();
        kube.expect_add_finalizer().never();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let action = reconcile(ws, ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ctx.config.poll_interval));
        let status = statuses.last();
        assert_eq!(condition(&status, CONDITION_READY).reason, "Available");
        assert_eq!(status.at_provider.workspace_id.as_deref(), Some("ws-1"));
        assert!(events.reasons().is_empty());
    }

    #[tokio::test]
    async fn unchanged_status_is_not_patched() {
        let mut ws = with_finalizer(sample_workspace("dev"));
        ws.status = Some(
            WorkspaceStatus::default()
                .with_observation(existing(true, "running").at_provider.unwrap())
                .with_condition(Condition::available())
                .with_condition(Condition::reconcile_success())
                .with_observed_generation(Some(1)),
        );

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "running")));

        let mut kube = MockKubeClient::new();
        kube.expect_patch_status().never();

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        reconcile(Arc::new(ws), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn drifted_workspace_is_updated() {
        let ws = Arc::new(with_finalizer(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(false, "running")));
        external.expect_update().times(1).returning(|_| {
            Ok(ExternalUpdate {
                connection_details: details(),
            })
        });
        external.expect_create().never();

        let mut kube = MockKubeClient::new();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let action = reconcile(ws, ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ctx.config.change_requeue));
        assert_eq!(events.reasons(), vec![reasons::UPDATED.to_string()]);
    }

    #[tokio::test]
    async fn connection_details_go_to_referenced_secret() {
        let mut ws = with_finalizer(sample_workspace("dev"));
        ws.spec.write_connection_secret_to_ref = Some(SecretReference {
            name: "dev-conn".to_string(),
            namespace: "team-a".to_string(),
        });

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "running")));

        let mut kube = MockKubeClient::new();
        kube.expect_publish_connection_details()
            .withf(|secret, owner, details| {
                secret.name == "dev-conn"
                    && owner.as_ref().is_some_and(|o| o.kind == "Workspace")
                    && details.get("owner").map(String::as_str) == Some("janedoe")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        StatusCapture::default().install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        reconcile(Arc::new(ws), ctx).await.unwrap();
    }

    /// Story: the ProviderConfig's secret is missing
    ///
    /// The reconcile fails, Synced=False explains why, and the error policy
    /// retries soon because the secret may appear.
    #[tokio::test]
    async fn story_missing_credentials_mark_synced_false_and_retry() {
        let ws = Arc::new(with_finalizer(sample_workspace("dev")));

        let mut connector = MockConnecter::new();
        connector.expect_connect().returning(|_| {
            Err(Error::credentials(
                "default",
                "secret crossplane-system/coder-creds not found",
            ))
        });

        let mut kube = MockKubeClient::new();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector, &events);
        let err = reconcile(ws.clone(), ctx.clone()).await.unwrap_err();

        let synced = condition(&statuses.last(), CONDITION_SYNCED);
        assert_eq!(synced.status, ConditionStatus::False);
        assert_eq!(synced.reason, "CredentialResolutionError");
        assert_eq!(events.reasons(), vec![reasons::CANNOT_CONNECT.to_string()]);
        assert_eq!(
            error_policy(ws, &err, ctx.clone()),
            Action::requeue(ctx.config.error_requeue)
        );
    }

    /// Story: the template named in the Workspace does not exist
    #[tokio::test]
    async fn story_missing_template_waits_for_a_change() {
        let ws = Arc::new(with_finalizer(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(ExternalObservation::absent()));
        external.expect_create().returning(|_| {
            Err(Error::reference(
                "template",
                "base-image",
                "not found in organization org1",
            ))
        });

        let mut kube = MockKubeClient::new();
        kube.expect_set_external_name().never();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let err = reconcile(ws.clone(), ctx.clone()).await.unwrap_err();

        assert_eq!(
            condition(&statuses.last(), CONDITION_SYNCED).reason,
            "ReferenceResolutionError"
        );
        assert_eq!(error_policy(ws, &err, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn transient_observe_failure_never_creates() {
        let ws = Arc::new(with_finalizer(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Err(Error::transient("get_workspace", "HTTP 503")));
        external.expect_create().never();

        let mut kube = MockKubeClient::new();
        StatusCapture::default().install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let err = reconcile(ws, ctx).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(events.reasons(), vec![reasons::CANNOT_OBSERVE.to_string()]);
    }

    // =========================================================================
    // Deletion Stories
    // =========================================================================

    /// Story: a Workspace is deleted while its Coder workspace exists
    #[tokio::test]
    async fn story_deleted_workspace_tears_down_coder_workspace() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "running")));
        external.expect_delete().times(1).returning(|_| Ok(()));

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer().never();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let action = reconcile(ws, ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(ctx.config.change_requeue));
        assert_eq!(condition(&statuses.last(), CONDITION_READY).reason, "Deleting");
        assert_eq!(events.reasons(), vec![reasons::DELETED.to_string()]);
    }

    #[tokio::test]
    async fn finalizer_is_removed_once_coder_workspace_is_gone() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(ExternalObservation::absent()));
        external.expect_delete().never();

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer()
            .withf(|name| name == "dev")
            .times(1)
            .returning(|_| Ok(()));

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let action = reconcile(ws, ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn orphan_policy_skips_remote_delete() {
        let mut ws = being_deleted(sample_workspace("dev"));
        ws.spec.deletion_policy = DeletionPolicy::Orphan;

        let mut connector = MockConnecter::new();
        connector.expect_connect().never();

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer().times(1).returning(|_| Ok(()));

        let events = EventCapture::default();
        let ctx = context(kube, connector, &events);
        let action = reconcile(Arc::new(ws), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn failed_delete_keeps_finalizer() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "running")));
        external.expect_delete().returning(|_| {
            Err(Error::RemoteDelete {
                workspace: "ws-1".to_string(),
                status: 403,
                message: "forbidden".to_string(),
            })
        });

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer().never();
        let statuses = StatusCapture::default();
        statuses.install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let err = reconcile(ws, ctx).await.unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(statuses.count(), 1);
        assert_eq!(events.reasons(), vec![reasons::CANNOT_DELETE.to_string()]);
    }

    /// Story: the Workspace is deleted while its start build is still running
    ///
    /// Coder refuses the delete build with 409 until the start build ends.
    /// Nothing about the Workspace will change, so the retry must be timed.
    #[tokio::test]
    async fn story_delete_conflict_requeues_instead_of_waiting() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(existing(true, "starting")));
        external.expect_delete().returning(|_| {
            Err(Error::RemoteDelete {
                workspace: "ws-1".to_string(),
                status: 409,
                message: "a build is already active".to_string(),
            })
        });

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer().never();
        StatusCapture::default().install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        let err = reconcile(ws.clone(), ctx.clone()).await.unwrap_err();

        assert_eq!(
            error_policy(ws, &err, ctx.clone()),
            Action::requeue(ctx.config.error_requeue)
        );
    }

    #[tokio::test]
    async fn failed_delete_build_is_retried_and_reported() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(deleting("failed")));
        external.expect_delete().times(1).returning(|_| Ok(()));

        let mut kube = MockKubeClient::new();
        kube.expect_remove_finalizer().never();
        StatusCapture::default().install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        reconcile(ws, ctx).await.unwrap();
        assert_eq!(events.reasons(), vec![reasons::DELETED.to_string()]);
    }

    #[tokio::test]
    async fn in_progress_delete_is_not_reported_again() {
        let ws = Arc::new(being_deleted(sample_workspace("dev")));

        let mut external = MockExternalClient::new();
        external
            .expect_observe()
            .returning(|_| Ok(deleting("pending")));
        external.expect_delete().times(1).returning(|_| Ok(()));

        let mut kube = MockKubeClient::new();
        StatusCapture::default().install(&mut kube);

        let events = EventCapture::default();
        let ctx = context(kube, connector_for(external), &events);
        reconcile(ws, ctx).await.unwrap();
        assert!(events.reasons().is_empty());
    }

    // =========================================================================
    // Status Mapping
    // =========================================================================

    #[test]
    fn ready_condition_follows_latest_build() {
        assert_eq!(ready_condition(&existing(true, "running")).reason, "Available");
        assert_eq!(ready_condition(&existing(true, "starting")).reason, "Creating");
        assert_eq!(ready_condition(&existing(true, "deleting")).reason, "Deleting");
        let stopped = ready_condition(&existing(true, "stopped"));
        assert_eq!(stopped.reason, "Unavailable");
        assert!(stopped.message.contains("stopped"));

        assert_eq!(ready_condition(&deleting("pending")).reason, "Deleting");
        let failed = ready_condition(&deleting("failed"));
        assert_eq!(failed.reason, "Unavailable");
        assert!(failed.message.contains("failed"));
        assert_eq!(ready_condition(&ExternalObservation::absent()).reason, "Creating");
    }
}
