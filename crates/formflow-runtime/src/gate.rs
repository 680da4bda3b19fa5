#![forbid(unsafe_code)]

//! Navigation gate: decides whether a page transition is accepted.
//!
//! [`FormModel`] owns the form state and processes one navigation request at
//! a time. Each request moves through named suspension points:
//!
//! ```text
//!  Navigate ──► barrier ──► resolve visible ──► visibility check ──► trigger?
//!                 │                                   │                 │
//!          AwaitingSave                          Rejected         none: Accepted
//!        (RequestSave or                         (PageHidden)           │
//!         unsaved flag)                                          local validators
//!                                                                       │
//!                                                              AwaitingValidation
//!                                                               (Cmd::Task fetch)
//!                                                                       │
//!                                                          merge ──► re-filter ──► decide
//! ```
//!
//! # Design Invariants
//!
//! 1. **One in flight**: a request that arrives while another is suspended
//!    waits in a single pending slot. A newer request displaces the waiting
//!    one, which resolves as `Rejected(Superseded)`.
//! 2. **Exactly one outcome per request**, including superseded ones.
//! 3. **Stale responses are dropped**: every in-flight request carries a
//!    ticket; a validation response for another ticket is ignored.
//! 4. **Fixed order**: barrier, visibility resolution, visibility check,
//!    validation fetch, merge, decision.
//! 5. **Later pages never block**: the accept decision uses the
//!    current-and-previous filter regardless of the requested trigger.
//!
//! # Failure Modes
//!
//! | Failure | Outcome | Reported |
//! |---------|---------|----------|
//! | Target hidden | `Rejected(PageHidden)` | no |
//! | Blocking validation errors | `Rejected(ValidationErrors)` | no |
//! | Transport, timeout, malformed body | `Rejected(Failed)` + error | once, via `Cmd::ReportError` |
//! | Hidden target not in page order | `Rejected(Failed)` + `UnknownPage` | once |
//! | Page-order calculation failed | `Rejected(Failed)` for the pending move | once |
//!
//! # Page Order
//!
//! With a [`PageOrderClient`] installed, "next page" first asks the app to
//! recompute the authored order, then moves relative to the new order. A
//! client answer of `None` keeps the current order.

use std::collections::BTreeSet;
use std::sync::Arc;

use formflow_core::{
    BackendValidationIssue, FrontendValidator, PageFilter, PageId, RequiredFieldValidator,
    ValidationFinding, ValidationTrigger, Validations, contains_errors, filter_by_page,
    map_backend_issues, merge_findings, recover_visible_page,
};
use tracing::{debug, debug_span};

use crate::error::{NavigationError, NavigationResult};
use crate::program::{Cmd, Model};
use crate::state::{AutoSaveBehavior, FormState};
use crate::transport::{PageOrderClient, PageOrderRequest, ValidationClient, ValidationRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Requests and outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// A request to show another page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub target: PageId,
    pub trigger: ValidationTrigger,
    pub return_to_view: Option<PageId>,
    pub focus_component_id: Option<String>,
    pub skip_page_caching: bool,
    pub keep_scroll_pos: bool,
    pub allow_navigation_to_hidden: bool,
}

impl NavigationRequest {
    /// Request for `target` with no validation.
    #[must_use]
    pub fn to(target: impl Into<PageId>) -> Self {
        Self {
            target: target.into(),
            trigger: ValidationTrigger::None,
            return_to_view: None,
            focus_component_id: None,
            skip_page_caching: false,
            keep_scroll_pos: false,
            allow_navigation_to_hidden: false,
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: ValidationTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    #[must_use]
    pub fn with_return_to_view(mut self, page: impl Into<PageId>) -> Self {
        self.return_to_view = Some(page.into());
        self
    }

    #[must_use]
    pub fn with_focus(mut self, component_id: impl Into<String>) -> Self {
        self.focus_component_id = Some(component_id.into());
        self
    }

    #[must_use]
    pub fn skip_page_caching(mut self) -> Self {
        self.skip_page_caching = true;
        self
    }

    #[must_use]
    pub fn keep_scroll_pos(mut self) -> Self {
        self.keep_scroll_pos = true;
        self
    }

    #[must_use]
    pub fn allow_hidden(mut self) -> Self {
        self.allow_navigation_to_hidden = true;
        self
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The target is not on the visible page list.
    PageHidden,
    /// Blocking errors on the current or an earlier page.
    ValidationErrors,
    /// Displaced from the pending slot by a newer request.
    Superseded,
    /// "Next page" asked before application metadata was loaded.
    MetadataMissing,
    /// "Next page" asked on the last page.
    NoNextPage,
    /// A system failure; the outcome carries the error.
    Failed,
    /// The program shut down before the request resolved.
    Cancelled,
}

/// Final result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Accepted {
        new_view: PageId,
        return_to_view: Option<PageId>,
        focus_component_id: Option<String>,
        /// Set for recovery moves that bypass the gate.
        corrective: bool,
    },
    Rejected {
        target: Option<PageId>,
        reason: RejectReason,
        keep_scroll_pos: bool,
        error: Option<NavigationError>,
    },
}

impl NavigationOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            Self::Accepted { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&NavigationError> {
        match self {
            Self::Rejected { error, .. } => error.as_ref(),
            Self::Accepted { .. } => None,
        }
    }
}

/// Where the gate currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatePhase {
    #[default]
    Idle,
    /// Waiting for the save signal or for unsaved changes to clear.
    AwaitingSave,
    /// Waiting for the remote validation response.
    AwaitingValidation,
    Accepted,
    Rejected,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum FormMsg {
    Navigate(NavigationRequest),
    /// Go to the return-to view, or the page after the current one.
    MoveToNextPage {
        trigger: ValidationTrigger,
        keep_scroll_pos: bool,
    },
    /// Recompute the page order without moving.
    RecalculatePageOrder,
    PageOrderCalculated {
        ticket: u64,
        result: NavigationResult<Option<Vec<PageId>>>,
    },
    /// The save subsystem finished a save.
    SaveCompleted,
    UnsavedChangesChanged(bool),
    FieldChanged {
        path: String,
        value: String,
    },
    /// The rule engine re-evaluated page visibility.
    HiddenPagesChanged(BTreeSet<PageId>),
    PageOrderChanged(Vec<PageId>),
    ValidationFetched {
        ticket: u64,
        result: NavigationResult<Vec<BackendValidationIssue>>,
    },
    ViewRestored(Option<PageId>),
    /// Cancel whatever is in the gate and stop the program.
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Barrier {
    /// Wait for `SaveCompleted` after requesting a save.
    SaveSignal,
    /// Wait for the unsaved-changes flag to clear.
    Clean,
}

/// Captured when the validation path starts; consumed by the merge.
#[derive(Debug)]
struct ValidationContext {
    filter: PageFilter,
    current: PageId,
    visible: Vec<PageId>,
    local: Vec<ValidationFinding>,
}

#[derive(Debug, Clone, Copy)]
struct NextMove {
    trigger: ValidationTrigger,
    keep_scroll_pos: bool,
}

/// A page-order calculation in the background.
#[derive(Debug)]
struct OrderCalculation {
    ticket: u64,
    /// `None` when only the order is wanted.
    next: Option<NextMove>,
}

#[derive(Debug)]
struct InFlight {
    request: NavigationRequest,
    ticket: u64,
    barrier: Option<Barrier>,
    validation: Option<ValidationContext>,
}

/// Form state plus the navigation gate.
pub struct FormModel {
    state: FormState,
    client: Arc<dyn ValidationClient>,
    page_order_client: Option<Arc<dyn PageOrderClient>>,
    validators: Vec<Box<dyn FrontendValidator>>,
    phase: GatePhase,
    in_flight: Option<InFlight>,
    pending: Option<NavigationRequest>,
    calculating: Option<OrderCalculation>,
    next_ticket: u64,
    outcomes: Vec<NavigationOutcome>,
    restore_on_init: bool,
}

impl FormModel {
    /// Model with the required-field validator installed.
    pub fn new(state: FormState, client: impl ValidationClient + 'static) -> Self {
        Self::with_shared_client(state, Arc::new(client))
    }

    pub fn with_shared_client(state: FormState, client: Arc<dyn ValidationClient>) -> Self {
        Self {
            state,
            client,
            page_order_client: None,
            validators: vec![Box::new(RequiredFieldValidator::default())],
            phase: GatePhase::Idle,
            in_flight: None,
            pending: None,
            calculating: None,
            next_ticket: 1,
            outcomes: Vec::new(),
            restore_on_init: true,
        }
    }

    /// Add a local validator (builder form).
    #[must_use]
    pub fn with_validator(mut self, validator: impl FrontendValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Recompute the page order remotely before each "next page" move.
    #[must_use]
    pub fn with_page_order_client(mut self, client: impl PageOrderClient + 'static) -> Self {
        self.page_order_client = Some(Arc::new(client));
        self
    }

    /// Skip reading the view cache in `init`.
    #[must_use]
    pub fn without_view_restore(mut self) -> Self {
        self.restore_on_init = false;
        self
    }

    #[must_use]
    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FormState {
        &mut self.state
    }

    #[must_use]
    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    #[must_use]
    pub fn current_view(&self) -> Option<&PageId> {
        self.state.ui.current_view.as_ref()
    }

    #[must_use]
    pub fn validations(&self) -> &Validations {
        &self.state.validations
    }

    /// Outcomes recorded since the last drain, oldest first.
    #[must_use]
    pub fn outcomes(&self) -> &[NavigationOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&NavigationOutcome> {
        self.outcomes.last()
    }

    pub fn drain_outcomes(&mut self) -> Vec<NavigationOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    /// A request is suspended in the gate.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn pending_request(&self) -> Option<&NavigationRequest> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn in_flight_ticket(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.ticket)
    }

    /// A page-order calculation is running.
    #[must_use]
    pub fn is_calculating_page_order(&self) -> bool {
        self.calculating.is_some()
    }

    // ── Gate ───────────────────────────────────────────────────────────

    fn navigate(&mut self, request: NavigationRequest) -> Cmd<FormMsg> {
        if self.in_flight.is_some() {
            debug!(page = %request.target, "gate busy, queueing request");
            if let Some(displaced) = self.pending.replace(request) {
                debug!(page = %displaced.target, "pending request superseded");
                return self.record_rejection(&displaced, RejectReason::Superseded, None);
            }
            return Cmd::none();
        }
        self.start(request)
    }

    fn start(&mut self, request: NavigationRequest) -> Cmd<FormMsg> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let _span = debug_span!("formflow.gate", page = %request.target, ticket).entered();

        let save_on_leave = self.state.ui.auto_save_behavior == AutoSaveBehavior::OnChangePage
            && self.state.is_current_page_visible();
        let barrier = if save_on_leave {
            Some(Barrier::SaveSignal)
        } else if self.state.unsaved_changes {
            Some(Barrier::Clean)
        } else {
            None
        };

        self.in_flight = Some(InFlight {
            request,
            ticket,
            barrier,
            validation: None,
        });

        match barrier {
            Some(Barrier::SaveSignal) => {
                self.phase = GatePhase::AwaitingSave;
                debug!(ticket, "awaiting save before leaving page");
                Cmd::request_save()
            }
            Some(Barrier::Clean) => {
                self.phase = GatePhase::AwaitingSave;
                debug!(ticket, "awaiting unsaved changes to clear");
                Cmd::none()
            }
            None => self.after_barrier(),
        }
    }

    fn release_barrier(&mut self, saved: bool) -> Cmd<FormMsg> {
        if self.phase != GatePhase::AwaitingSave {
            return Cmd::none();
        }
        let Some(flight) = self.in_flight.as_mut() else {
            return Cmd::none();
        };
        let released = match flight.barrier {
            Some(Barrier::SaveSignal) => saved,
            Some(Barrier::Clean) => true,
            None => false,
        };
        if !released {
            return Cmd::none();
        }
        flight.barrier = None;
        self.after_barrier()
    }

    fn after_barrier(&mut self) -> Cmd<FormMsg> {
        let Some(request) = self.in_flight.as_ref().map(|f| f.request.clone()) else {
            return Cmd::none();
        };

        let visible = self.state.visible_pages();

        if self.state.ui.view_cache_key.is_none() {
            self.state.ui.view_cache_key = self.state.instance_id().map(str::to_owned);
        }

        let target_visible = visible.as_ref().map(|v| v.contains(&request.target));
        if request.allow_navigation_to_hidden {
            let unknown = self
                .state
                .ui
                .page_order
                .all()
                .is_some_and(|all| !all.contains(&request.target));
            if target_visible != Some(true) && unknown {
                return self.fail(NavigationError::UnknownPage(request.target));
            }
        } else if target_visible == Some(false) {
            debug!(page = %request.target, "target page not visible");
            return self.reject(RejectReason::PageHidden);
        }

        let Some(filter) = request.trigger.page_filter() else {
            return self.accept();
        };

        let Some(current) = self.state.ui.current_view.clone() else {
            return self.fail(NavigationError::MissingState("current view"));
        };

        let local: Vec<ValidationFinding> = {
            let nodes = self.state.resolved_nodes(visible.as_deref());
            self.validators
                .iter()
                .flat_map(|v| nodes.run_validations(v.as_ref(), &self.state.form_data))
                .collect()
        };

        let remote = match (
            self.state.instance_id(),
            self.state.current_task_data_element_id(),
        ) {
            (Some(instance_id), Some(data_element_id)) => Some(ValidationRequest {
                instance_id: instance_id.to_owned(),
                data_element_id: data_element_id.to_owned(),
                layout_id: (request.trigger == ValidationTrigger::Page).then(|| current.clone()),
            }),
            _ => None,
        };

        let ctx = ValidationContext {
            filter,
            current,
            visible: visible.unwrap_or_default(),
            local,
        };

        let Some(validation_request) = remote else {
            debug!("no instance data element, skipping server validation");
            return self.finish_validation(ctx, Vec::new());
        };

        let Some(flight) = self.in_flight.as_mut() else {
            return Cmd::none();
        };
        flight.validation = Some(ctx);
        let ticket = flight.ticket;
        self.phase = GatePhase::AwaitingValidation;
        debug!(ticket, "awaiting server validation");

        let client = Arc::clone(&self.client);
        Cmd::task_named("formflow.validate", move || FormMsg::ValidationFetched {
            ticket,
            result: client.fetch_validations(&validation_request),
        })
    }

    fn on_validation_fetched(
        &mut self,
        ticket: u64,
        result: NavigationResult<Vec<BackendValidationIssue>>,
    ) -> Cmd<FormMsg> {
        if self.phase != GatePhase::AwaitingValidation || self.in_flight_ticket() != Some(ticket) {
            debug!(ticket, "stale validation response dropped");
            return Cmd::none();
        }
        let ctx = self.in_flight.as_mut().and_then(|f| f.validation.take());
        match (result, ctx) {
            (Ok(issues), Some(ctx)) => self.finish_validation(ctx, issues),
            (Ok(_), None) => self.fail(NavigationError::MissingState("validation context")),
            (Err(error), _) => self.fail(error),
        }
    }

    fn finish_validation(
        &mut self,
        ctx: ValidationContext,
        issues: Vec<BackendValidationIssue>,
    ) -> Cmd<FormMsg> {
        let server = map_backend_issues(&issues, &self.state.text_resources);
        let merged = merge_findings(
            &ctx.local,
            &server,
            ctx.filter,
            &ctx.current,
            &ctx.visible,
            &self.state.layouts,
        );
        let blocking = filter_by_page(
            &merged,
            PageFilter::CurrentAndPreviousPages,
            &ctx.current,
            &ctx.visible,
        );
        self.state.validations = merged;

        if self.state.ui.return_to_view.is_some() || !contains_errors(&blocking) {
            self.accept()
        } else {
            debug!(page = %ctx.current, "blocking validation errors");
            self.reject(RejectReason::ValidationErrors)
        }
    }

    fn accept(&mut self) -> Cmd<FormMsg> {
        let Some(flight) = self.in_flight.take() else {
            return Cmd::none();
        };
        let request = flight.request;
        let persist = if request.skip_page_caching {
            Cmd::none()
        } else {
            self.persist_view(request.target.clone())
        };

        let ui = &mut self.state.ui;
        ui.current_view = Some(request.target.clone());
        ui.return_to_view = request.return_to_view.clone();
        ui.focus_component_id = request.focus_component_id.clone();
        ui.keep_scroll_pos = false;
        self.phase = GatePhase::Accepted;
        debug!(ticket = flight.ticket, page = %request.target, "navigation accepted");

        self.outcomes.push(NavigationOutcome::Accepted {
            new_view: request.target,
            return_to_view: request.return_to_view,
            focus_component_id: request.focus_component_id,
            corrective: false,
        });
        let next = self.start_pending();
        Cmd::batch(vec![persist, next])
    }

    fn reject(&mut self, reason: RejectReason) -> Cmd<FormMsg> {
        self.reject_in_flight(reason, None)
    }

    fn fail(&mut self, error: NavigationError) -> Cmd<FormMsg> {
        self.reject_in_flight(RejectReason::Failed, Some(error))
    }

    fn reject_in_flight(
        &mut self,
        reason: RejectReason,
        error: Option<NavigationError>,
    ) -> Cmd<FormMsg> {
        let Some(flight) = self.in_flight.take() else {
            return Cmd::none();
        };
        self.state.ui.keep_scroll_pos = flight.request.keep_scroll_pos;
        self.phase = GatePhase::Rejected;
        debug!(ticket = flight.ticket, ?reason, "navigation rejected");
        let report = self.record_rejection(&flight.request, reason, error);
        let next = self.start_pending();
        Cmd::batch(vec![report, next])
    }

    fn record_rejection(
        &mut self,
        request: &NavigationRequest,
        reason: RejectReason,
        error: Option<NavigationError>,
    ) -> Cmd<FormMsg> {
        let report = match &error {
            Some(e) => Cmd::report_error(
                format!("navigation to page {} failed", request.target),
                e.clone(),
            ),
            None => Cmd::none(),
        };
        self.outcomes.push(NavigationOutcome::Rejected {
            target: Some(request.target.clone()),
            reason,
            keep_scroll_pos: request.keep_scroll_pos,
            error,
        });
        report
    }

    fn start_pending(&mut self) -> Cmd<FormMsg> {
        match self.pending.take() {
            Some(request) => self.start(request),
            None => Cmd::none(),
        }
    }

    fn persist_view(&self, page: PageId) -> Cmd<FormMsg> {
        match self.state.view_cache_key() {
            Some(key) => Cmd::persist_view(key, page),
            None => {
                debug!(%page, "no instance loaded, view not cached");
                Cmd::none()
            }
        }
    }

    // ── Companions ─────────────────────────────────────────────────────

    fn move_to_next_page(
        &mut self,
        trigger: ValidationTrigger,
        keep_scroll_pos: bool,
    ) -> Cmd<FormMsg> {
        if self.state.metadata.is_none() {
            self.outcomes.push(NavigationOutcome::Rejected {
                target: None,
                reason: RejectReason::MetadataMissing,
                keep_scroll_pos,
                error: None,
            });
            return Cmd::none();
        }
        let next = NextMove {
            trigger,
            keep_scroll_pos,
        };
        match self.calculate_page_order(Some(next)) {
            Some(cmd) => cmd,
            None => self.move_from_current(next),
        }
    }

    fn move_from_current(&mut self, next: NextMove) -> Cmd<FormMsg> {
        let NextMove {
            trigger,
            keep_scroll_pos,
        } = next;
        let target = self.state.ui.return_to_view.clone().or_else(|| {
            let current = self.state.ui.current_view.as_ref()?;
            self.state.ui.page_order.next_visible(current)
        });
        let Some(target) = target else {
            self.outcomes.push(NavigationOutcome::Rejected {
                target: None,
                reason: RejectReason::NoNextPage,
                keep_scroll_pos,
                error: None,
            });
            return Cmd::none();
        };
        let mut request = NavigationRequest::to(target).with_trigger(trigger);
        request.keep_scroll_pos = keep_scroll_pos;
        self.navigate(request)
    }

    /// Start a background page-order calculation.
    ///
    /// `None` when no client is installed or no instance is loaded.
    fn calculate_page_order(&mut self, next: Option<NextMove>) -> Option<Cmd<FormMsg>> {
        let client = Arc::clone(self.page_order_client.as_ref()?);
        let instance = self.state.instance.as_ref()?;
        let data_type_id = match (&self.state.metadata, instance.current_task.as_deref()) {
            (Some(metadata), Some(task)) => metadata.data_type_for_task(task).map(str::to_owned),
            _ => None,
        };
        let request = PageOrderRequest {
            instance_id: instance.id.clone(),
            current_page: self.state.ui.current_view.clone(),
            layout_set_id: self.state.ui.layout_set_id.clone(),
            data_type_id,
            form_data: self.state.form_data.clone(),
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let displaced = self.calculating.replace(OrderCalculation { ticket, next });
        if let Some(superseded) = displaced.and_then(|c| c.next) {
            debug!(ticket, "pending next-page move superseded");
            self.outcomes.push(NavigationOutcome::Rejected {
                target: None,
                reason: RejectReason::Superseded,
                keep_scroll_pos: superseded.keep_scroll_pos,
                error: None,
            });
        }
        debug!(ticket, "calculating page order");
        Some(Cmd::task_named("formflow.page_order", move || {
            FormMsg::PageOrderCalculated {
                ticket,
                result: client.calculate_page_order(&request),
            }
        }))
    }

    fn recalculate_page_order(&mut self) -> Cmd<FormMsg> {
        if self.state.metadata.is_none() {
            debug!("no application metadata, page order not recalculated");
            return Cmd::none();
        }
        self.calculate_page_order(None).unwrap_or_else(Cmd::none)
    }

    fn on_page_order_calculated(
        &mut self,
        ticket: u64,
        result: NavigationResult<Option<Vec<PageId>>>,
    ) -> Cmd<FormMsg> {
        if self.calculating.as_ref().map(|c| c.ticket) != Some(ticket) {
            debug!(ticket, "stale page order response dropped");
            return Cmd::none();
        }
        let Some(calculation) = self.calculating.take() else {
            return Cmd::none();
        };
        match result {
            Ok(Some(order)) => {
                debug!(ticket, pages = order.len(), "page order recalculated");
                self.state.ui.page_order.set_order(order);
            }
            Ok(None) => debug!(ticket, "page order unchanged"),
            Err(error) => {
                let report = Cmd::report_error("failed to calculate page order", error.clone());
                if let Some(next) = calculation.next {
                    self.outcomes.push(NavigationOutcome::Rejected {
                        target: None,
                        reason: RejectReason::Failed,
                        keep_scroll_pos: next.keep_scroll_pos,
                        error: Some(error),
                    });
                }
                return report;
            }
        }
        let recovery = self.recover();
        let next = match calculation.next {
            Some(next) => self.move_from_current(next),
            None => Cmd::none(),
        };
        Cmd::batch(vec![recovery, next])
    }

    /// Cancel everything the gate holds and stop the program.
    fn shutdown(&mut self) -> Cmd<FormMsg> {
        let requests: Vec<NavigationRequest> = self
            .in_flight
            .take()
            .map(|f| f.request)
            .into_iter()
            .chain(self.pending.take())
            .collect();
        for request in requests {
            debug!(page = %request.target, "request cancelled by shutdown");
            self.outcomes.push(NavigationOutcome::Rejected {
                target: Some(request.target),
                reason: RejectReason::Cancelled,
                keep_scroll_pos: request.keep_scroll_pos,
                error: None,
            });
        }
        if let Some(next) = self.calculating.take().and_then(|c| c.next) {
            self.outcomes.push(NavigationOutcome::Rejected {
                target: None,
                reason: RejectReason::Cancelled,
                keep_scroll_pos: next.keep_scroll_pos,
                error: None,
            });
        }
        self.phase = GatePhase::Idle;
        Cmd::quit()
    }

    /// Move off a page that became hidden, bypassing the gate.
    fn recover(&mut self) -> Cmd<FormMsg> {
        let Some(current) = self.state.ui.current_view.clone() else {
            return Cmd::none();
        };
        let visible = self.state.visible_pages();
        let recovery = recover_visible_page(
            self.state.ui.page_order.all(),
            visible.as_deref(),
            &current,
        );
        if !recovery.changed {
            return Cmd::none();
        }
        debug!(from = %current, to = %recovery.page, "current page hidden, recovering");
        self.state.ui.current_view = Some(recovery.page.clone());
        self.outcomes.push(NavigationOutcome::Accepted {
            new_view: recovery.page.clone(),
            return_to_view: self.state.ui.return_to_view.clone(),
            focus_component_id: None,
            corrective: true,
        });
        self.persist_view(recovery.page)
    }

    fn on_view_restored(&mut self, page: Option<PageId>) -> Cmd<FormMsg> {
        match page {
            Some(page) if self.state.ui.page_order.contains(&page) => {
                debug!(%page, "restored last viewed page");
                self.state.ui.current_view = Some(page);
            }
            Some(page) => debug!(%page, "cached page not in page order, ignored"),
            None => {}
        }
        self.recover()
    }
}

impl Model for FormModel {
    type Message = FormMsg;

    fn init(&mut self) -> Cmd<FormMsg> {
        if !self.restore_on_init {
            return Cmd::none();
        }
        match self.state.view_cache_key() {
            Some(key) => Cmd::restore_view(key, FormMsg::ViewRestored),
            None => Cmd::none(),
        }
    }

    fn update(&mut self, msg: FormMsg) -> Cmd<FormMsg> {
        match msg {
            FormMsg::Navigate(request) => self.navigate(request),
            FormMsg::MoveToNextPage {
                trigger,
                keep_scroll_pos,
            } => self.move_to_next_page(trigger, keep_scroll_pos),
            FormMsg::SaveCompleted => {
                self.state.unsaved_changes = false;
                self.release_barrier(true)
            }
            FormMsg::UnsavedChangesChanged(unsaved) => {
                self.state.unsaved_changes = unsaved;
                if unsaved {
                    Cmd::none()
                } else {
                    self.release_barrier(false)
                }
            }
            FormMsg::FieldChanged { path, value } => {
                self.state.form_data.set(path, value);
                self.state.unsaved_changes = true;
                Cmd::none()
            }
            FormMsg::HiddenPagesChanged(hidden) => {
                self.state.ui.page_order.set_hidden(hidden);
                self.recover()
            }
            FormMsg::PageOrderChanged(order) => {
                self.state.ui.page_order.set_order(order);
                self.recover()
            }
            FormMsg::ValidationFetched { ticket, result } => {
                self.on_validation_fetched(ticket, result)
            }
            FormMsg::RecalculatePageOrder => self.recalculate_page_order(),
            FormMsg::PageOrderCalculated { ticket, result } => {
                self.on_page_order_calculated(ticket, result)
            }
            FormMsg::ViewRestored(page) => self.on_view_restored(page),
            FormMsg::Shutdown => self.shutdown(),
        }
    }
}

impl std::fmt::Debug for FormModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormModel")
            .field("current_view", &self.state.ui.current_view)
            .field("phase", &self.phase)
            .field("in_flight", &self.in_flight_ticket())
            .field("pending", &self.pending.as_ref().map(|r| &r.target))
            .field("calculating", &self.calculating.as_ref().map(|c| c.ticket))
            .field("validators", &self.validators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::{ApplicationMetadata, Component, Instance, Layouts, PageOrder};

    fn offline(_: &ValidationRequest) -> NavigationResult<Vec<BackendValidationIssue>> {
        Err(NavigationError::Transport("offline".into()))
    }

    fn model() -> FormModel {
        let layouts = Layouts::new()
            .with_page("a", vec![Component::new("x").with_binding("simpleBinding", "M.X")])
            .with_page("b", vec![]);
        let state = FormState::new(layouts, PageOrder::new(["a", "b"]).with_hidden(Vec::<&str>::new()))
            .with_current_view("a");
        FormModel::new(state, offline).without_view_restore()
    }

    #[test]
    fn builder_sets_flags() {
        let r = NavigationRequest::to("p")
            .with_trigger(ValidationTrigger::Page)
            .with_return_to_view("summary")
            .with_focus("c1")
            .skip_page_caching()
            .keep_scroll_pos()
            .allow_hidden();
        assert_eq!(r.trigger, ValidationTrigger::Page);
        assert_eq!(r.return_to_view, Some("summary".into()));
        assert!(r.skip_page_caching && r.keep_scroll_pos && r.allow_navigation_to_hidden);
    }

    #[test]
    fn fast_path_accepts_and_persists() {
        let mut m = model();
        m.state_mut().instance = Some(Instance {
            id: "512/abc".into(),
            ..Instance::default()
        });
        let cmd = m.update(FormMsg::Navigate(NavigationRequest::to("b")));
        assert!(matches!(cmd, Cmd::PersistView { ref key, ref page } if key == "512/abc" && page == "b"));
        assert_eq!(m.current_view(), Some(&"b".into()));
        assert_eq!(m.phase(), GatePhase::Accepted);
    }

    #[test]
    fn no_instance_means_no_cache_traffic() {
        let mut m = model();
        assert!(matches!(m.init(), Cmd::None));

        let cmd = m.update(FormMsg::Navigate(NavigationRequest::to("b")));
        assert!(matches!(cmd, Cmd::None));
        assert_eq!(m.current_view(), Some(&"b".into()));
        assert_eq!(m.state().ui.view_cache_key, None);
    }

    #[test]
    fn shutdown_cancels_held_requests_and_quits() {
        let mut m = model();
        m.state_mut().unsaved_changes = true;
        m.update(FormMsg::Navigate(NavigationRequest::to("b")));
        m.update(FormMsg::Navigate(NavigationRequest::to("a").keep_scroll_pos()));
        assert!(m.is_busy());

        let cmd = m.update(FormMsg::Shutdown);
        assert!(matches!(cmd, Cmd::Quit));
        assert!(!m.is_busy());
        assert!(m.pending_request().is_none());
        let reasons: Vec<_> = m.outcomes().iter().filter_map(NavigationOutcome::reject_reason).collect();
        assert_eq!(reasons, vec![RejectReason::Cancelled, RejectReason::Cancelled]);
        assert_eq!(m.current_view(), Some(&"a".into()));
    }

    #[test]
    fn recalculate_without_client_is_a_no_op() {
        let mut m = model();
        m.state_mut().metadata = Some(ApplicationMetadata::default());
        assert!(matches!(m.update(FormMsg::RecalculatePageOrder), Cmd::None));
        assert!(!m.is_calculating_page_order());
        assert!(m.outcomes().is_empty());
    }

    #[test]
    fn stale_page_order_response_is_dropped() {
        let mut m = model();
        let cmd = m.update(FormMsg::PageOrderCalculated {
            ticket: 99,
            result: Ok(Some(vec!["b".into(), "a".into()])),
        });
        assert!(matches!(cmd, Cmd::None));
        assert_eq!(m.state().ui.page_order.all(), Some(&[PageId::new("a"), PageId::new("b")][..]));
    }

    #[test]
    fn skip_page_caching_emits_no_persist() {
        let mut m = model();
        let cmd = m.update(FormMsg::Navigate(NavigationRequest::to("b").skip_page_caching()));
        assert!(matches!(cmd, Cmd::None));
        assert!(m.last_outcome().is_some_and(NavigationOutcome::is_accepted));
    }

    #[test]
    fn unsaved_changes_hold_the_request() {
        let mut m = model();
        m.update(FormMsg::FieldChanged {
            path: "M.X".into(),
            value: "1".into(),
        });
        let cmd = m.update(FormMsg::Navigate(NavigationRequest::to("b")));
        assert!(matches!(cmd, Cmd::None));
        assert_eq!(m.phase(), GatePhase::AwaitingSave);
        assert!(m.outcomes().is_empty());

        m.update(FormMsg::UnsavedChangesChanged(false));
        assert_eq!(m.current_view(), Some(&"b".into()));
    }

    #[test]
    fn save_on_page_change_requests_save() {
        let mut m = model();
        m.state_mut().ui.auto_save_behavior = AutoSaveBehavior::OnChangePage;
        let cmd = m.update(FormMsg::Navigate(NavigationRequest::to("b")));
        assert!(matches!(cmd, Cmd::RequestSave));

        // Only the save signal releases this barrier.
        m.update(FormMsg::UnsavedChangesChanged(false));
        assert_eq!(m.phase(), GatePhase::AwaitingSave);
        m.update(FormMsg::SaveCompleted);
        assert_eq!(m.current_view(), Some(&"b".into()));
    }

    #[test]
    fn missing_current_view_fails_validation_path() {
        let mut m = model();
        m.state_mut().ui.current_view = None;
        let cmd = m.update(FormMsg::Navigate(
            NavigationRequest::to("b").with_trigger(ValidationTrigger::Page),
        ));
        assert!(matches!(cmd, Cmd::ReportError { .. }));
        assert_eq!(
            m.last_outcome().and_then(NavigationOutcome::error),
            Some(&NavigationError::MissingState("current view"))
        );
    }

    #[test]
    fn next_page_without_metadata_rejects() {
        let mut m = model();
        m.update(FormMsg::MoveToNextPage {
            trigger: ValidationTrigger::None,
            keep_scroll_pos: false,
        });
        assert_eq!(
            m.last_outcome().and_then(NavigationOutcome::reject_reason),
            Some(RejectReason::MetadataMissing)
        );
        assert_eq!(m.current_view(), Some(&"a".into()));
    }
}
