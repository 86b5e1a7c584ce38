//! Batch coordination across processes sharing a batch id.
//!
//! A batch operation fans out to one task per process and reports every
//! member separately. Members that already succeeded are never rolled back.

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use stepflow_core::{
    Actor, BatchId, EditType, ProcessId, Property, PropertyOwner, TaskId, TaskStatus,
};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::script::ScriptError;
use crate::transition::CloseMode;

/// One task of a batch group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMember {
    pub process_id: ProcessId,
    pub task_id: TaskId,
    /// Status when the group was resolved.
    pub status: TaskStatus,
}

/// Batch-eligible tasks with the same title in every process of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchGroup {
    pub batch_id: BatchId,
    pub title: String,
    pub members: Vec<BatchMember>,
}

/// Outcome for one member.
#[derive(Debug)]
pub enum MemberResult {
    Applied,
    /// Not attempted or not applicable, e.g. the task was not OPEN.
    Skipped(String),
    Failed(EngineError),
}

#[derive(Debug)]
pub struct MemberOutcome {
    pub process_id: ProcessId,
    pub task_id: TaskId,
    pub result: MemberResult,
}

/// Per-member outcomes, in member order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<MemberOutcome>,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.count(|r| matches!(r, MemberResult::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, MemberResult::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, MemberResult::Failed(_)))
    }

    /// Returns true if every member was applied.
    pub fn is_complete(&self) -> bool {
        self.applied() == self.outcomes.len()
    }

    fn count(&self, pred: impl Fn(&MemberResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

impl MemberOutcome {
    fn new(member: &BatchMember, result: MemberResult) -> Self {
        Self {
            process_id: member.process_id.clone(),
            task_id: member.task_id.clone(),
            result,
        }
    }
}

/// Conflicts mean another actor got there first; the member is skipped.
fn conflict_skips<T>(result: EngineResult<T>) -> MemberResult {
    match result {
        Ok(_) => MemberResult::Applied,
        Err(EngineError::Conflict { reason, .. }) => MemberResult::Skipped(reason),
        Err(err) => MemberResult::Failed(err),
    }
}

fn outcome_of<T>(result: EngineResult<T>) -> MemberResult {
    match result {
        Ok(_) => MemberResult::Applied,
        Err(err) => MemberResult::Failed(err),
    }
}

impl Engine {
    /// Resolve the batch group for `title` in `batch`.
    ///
    /// Each process contributes at most one batch-eligible task with the
    /// title; an OPEN or INWORK one is preferred over the others.
    pub async fn batch_group(&self, batch: &BatchId, title: &str) -> EngineResult<BatchGroup> {
        let mut members = Vec::new();
        for process_id in self.inner.store.processes_in_batch(batch).await? {
            let process = self.inner.store.load_process(&process_id).await?;
            let candidates: Vec<_> = process
                .tasks()
                .iter()
                .filter(|t| t.title == title && t.is_batch_eligible)
                .collect();
            let chosen = candidates
                .iter()
                .find(|t| t.status.is_current())
                .or_else(|| candidates.first());
            if let Some(task) = chosen {
                members.push(BatchMember {
                    process_id: process.id.clone(),
                    task_id: task.id.clone(),
                    status: task.status,
                });
            }
        }

        if members.is_empty() {
            return Err(EngineError::NotFound(format!(
                "no batch task titled '{title}' in batch {batch}"
            )));
        }
        Ok(BatchGroup {
            batch_id: batch.clone(),
            title: title.to_string(),
            members,
        })
    }

    /// Take over every OPEN member. A single-member group behaves exactly
    /// like [`Engine::take_over`].
    pub async fn take_over_batch(
        &self,
        group: &BatchGroup,
        actor: &Actor,
    ) -> EngineResult<BatchReport> {
        if let [member] = group.members.as_slice() {
            self.take_over(&member.task_id, actor).await?;
            return Ok(BatchReport {
                outcomes: vec![MemberOutcome::new(member, MemberResult::Applied)],
            });
        }

        let results = join_all(group.members.iter().map(|member| async move {
            if member.status != TaskStatus::Open {
                return MemberResult::Skipped(format!("task is {}", member.status));
            }
            conflict_skips(
                self.take_over_as(&member.task_id, actor, EditType::ManualBatch)
                    .await,
            )
        }))
        .await;
        Ok(self.finish_batch("take over", group, results))
    }

    /// Close every member with the single-task close rules. A member
    /// failing validation stays unchanged and is reported as failed.
    pub async fn close_batch(&self, group: &BatchGroup, actor: &Actor) -> EngineResult<BatchReport> {
        let results = join_all(group.members.iter().map(|member| async move {
            conflict_skips(
                self.close_with(
                    &member.task_id,
                    Some(actor),
                    CloseMode::Manual(EditType::ManualBatch),
                )
                .await,
            )
        }))
        .await;
        Ok(self.finish_batch("close", group, results))
    }

    /// Hand every INWORK member back.
    pub async fn give_back_batch(
        &self,
        group: &BatchGroup,
        actor: &Actor,
    ) -> EngineResult<BatchReport> {
        let results = join_all(group.members.iter().map(|member| async move {
            conflict_skips(
                self.give_back_as(&member.task_id, actor, EditType::ManualBatch)
                    .await,
            )
        }))
        .await;
        Ok(self.finish_batch("give back", group, results))
    }

    /// Report the same problem from every member.
    pub async fn report_problem_batch(
        &self,
        group: &BatchGroup,
        target_title: &str,
        message: &str,
        actor: &Actor,
    ) -> EngineResult<BatchReport> {
        let results = join_all(group.members.iter().map(|member| async move {
            outcome_of(
                self.report_problem(&member.task_id, target_title, message, actor)
                    .await,
            )
        }))
        .await;
        Ok(self.finish_batch("report problem", group, results))
    }

    /// Solve the same problem from every member.
    pub async fn solve_problem_batch(
        &self,
        group: &BatchGroup,
        target_title: &str,
        message: &str,
        actor: &Actor,
    ) -> EngineResult<BatchReport> {
        let results = join_all(group.members.iter().map(|member| async move {
            conflict_skips(
                self.solve_problem(&member.task_id, target_title, message, actor)
                    .await,
            )
        }))
        .await;
        Ok(self.finish_batch("solve problem", group, results))
    }

    /// Write one property to the process of every member.
    ///
    /// The member from `origin` keeps `property` itself; every other
    /// process gets its own copy with a fresh id. Untitled properties left
    /// on a process are removed first.
    pub async fn apply_property_to_all(
        &self,
        group: &BatchGroup,
        origin: &ProcessId,
        property: &Property,
    ) -> EngineResult<BatchReport> {
        if property.has_blank_title() {
            return Err(EngineError::InvalidInput("property title is empty".into()));
        }

        let results = join_all(group.members.iter().map(|member| async move {
            let owner = PropertyOwner::Process(member.process_id.clone());
            let value = if &member.process_id == origin {
                property.clone()
            } else {
                property.detached_copy()
            };
            outcome_of(self.replace_blank_properties(&owner, value).await)
        }))
        .await;
        Ok(self.finish_batch("apply property", group, results))
    }

    async fn replace_blank_properties(
        &self,
        owner: &PropertyOwner,
        property: Property,
    ) -> EngineResult<()> {
        let store = &self.inner.properties;
        for blank in store
            .properties(owner)
            .await?
            .into_iter()
            .filter(|p| p.has_blank_title())
        {
            store.remove_property(owner, &blank.id).await?;
        }
        store.put_property(owner, property).await?;
        Ok(())
    }

    /// Run the script named `script_name` for every member whose task
    /// carries it. Tasks are not closed; a non-zero exit is a failure.
    pub async fn run_script_batch(
        &self,
        group: &BatchGroup,
        script_name: &str,
    ) -> EngineResult<BatchReport> {
        let results = join_all(group.members.iter().map(|member| async move {
            let process = match self.inner.store.load_process(&member.process_id).await {
                Ok(process) => process,
                Err(err) => return MemberResult::Failed(err.into()),
            };
            let Some(task) = process.task(&member.task_id) else {
                return MemberResult::Failed(EngineError::NotFound(format!(
                    "task {}",
                    member.task_id
                )));
            };
            if task.script.as_ref().map(|s| s.name.as_str()) != Some(script_name) {
                return MemberResult::Skipped(format!("no script named '{script_name}'"));
            }

            let failure = match self.inner.scripts.run_script(&process, task).await {
                Ok(0) => return MemberResult::Applied,
                Ok(code) => ScriptError::NonZeroExit(code),
                Err(err) => err,
            };
            MemberResult::Failed(EngineError::ScriptFailure {
                task: task.id.clone(),
                source: failure,
            })
        }))
        .await;
        Ok(self.finish_batch("run script", group, results))
    }

    fn finish_batch(
        &self,
        operation: &str,
        group: &BatchGroup,
        results: Vec<MemberResult>,
    ) -> BatchReport {
        let outcomes: Vec<MemberOutcome> = group
            .members
            .iter()
            .zip(results)
            .map(|(member, result)| {
                match &result {
                    MemberResult::Skipped(reason) => {
                        warn!(operation, task_id = %member.task_id, reason = %reason, "Batch member skipped")
                    }
                    MemberResult::Failed(err) => {
                        warn!(operation, task_id = %member.task_id, error = %err, "Batch member failed")
                    }
                    MemberResult::Applied => {}
                }
                MemberOutcome::new(member, result)
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            operation,
            batch_id = %group.batch_id,
            title = %group.title,
            applied = report.applied(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::store::PropertyStore;
    use stepflow_core::{Process, PropertyType, ScriptSpec, Task};

    /// Three processes in batch "b", each with Scan(1) -> Export(2). Scan
    /// carries a "derive" script but is not automatic.
    async fn batch_of_three(h: &Harness) -> BatchGroup {
        for n in 1..=3 {
            let pid = ProcessId::new(format!("p{n}"));
            let mut scan = Task::new(pid.clone(), "Scan", 1)
                .with_id(format!("s{n}"))
                .batch_eligible()
                .validated_on_close();
            scan.script = Some(ScriptSpec::new("derive", "true"));

            let process = Process::with_id(
                pid.clone(),
                format!("Volume {n}"),
                vec![scan, Task::new(pid, "Export", 2).with_id(format!("e{n}"))],
            )
            .unwrap()
            .with_batch(BatchId::new("b"));
            h.engine.start_process(process).await.unwrap();
        }
        h.engine
            .batch_group(&BatchId::new("b"), "Scan")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_group_resolution() {
        let h = harness();
        let group = batch_of_three(&h).await;
        assert_eq!(group.members.len(), 3);
        assert!(group.members.iter().all(|m| m.status == TaskStatus::Open));

        // Export is not batch eligible
        assert!(matches!(
            h.engine.batch_group(&BatchId::new("b"), "Export").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_take_over_batch_skips_taken_members() {
        let h = harness();
        let group = batch_of_three(&h).await;
        h.engine
            .take_over(&TaskId::new("s2"), &Actor::new("jonas"))
            .await
            .unwrap();

        let report = h.engine.take_over_batch(&group, &actor()).await.unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.applied(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(matches!(report.outcomes[1].result, MemberResult::Skipped(_)));

        let s1 = task(&h.store, "s1").await;
        assert_eq!(s1.status, TaskStatus::Inwork);
        assert_eq!(s1.edit_type, EditType::ManualBatch);
        assert_eq!(
            task(&h.store, "s2").await.processing_user,
            Some(Actor::new("jonas"))
        );
    }

    #[tokio::test]
    async fn test_single_member_batch_delegates() {
        let h = harness();
        let group = batch_of_three(&h).await;
        let single = BatchGroup {
            members: vec![group.members[0].clone()],
            ..group
        };

        h.engine.take_over_batch(&single, &actor()).await.unwrap();
        assert_eq!(task(&h.store, "s1").await.edit_type, EditType::Manual);

        let err = h.engine.take_over_batch(&single, &actor()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_close_batch_partial_failure() {
        let h = harness_with(
            ScriptedRunner::default(),
            FailingChecks {
                tasks: vec![TaskId::new("s2")],
            },
        );
        let group = batch_of_three(&h).await;
        h.engine.take_over_batch(&group, &actor()).await.unwrap();
        let before = task(&h.store, "s2").await;

        let report = h.engine.close_batch(&group, &actor()).await.unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(report.outcomes[0].result, MemberResult::Applied));
        assert!(matches!(
            report.outcomes[1].result,
            MemberResult::Failed(EngineError::Validation { .. })
        ));
        assert!(matches!(report.outcomes[2].result, MemberResult::Applied));
        assert!(!report.is_complete());

        assert_eq!(status(&h.store, "s1").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "s3").await, TaskStatus::Done);
        assert_eq!(task(&h.store, "s2").await, before);
        assert_eq!(status(&h.store, "e1").await, TaskStatus::Open);
        assert_eq!(status(&h.store, "e2").await, TaskStatus::Locked);
    }

    #[tokio::test]
    async fn test_give_back_batch() {
        let h = harness();
        let group = batch_of_three(&h).await;
        h.engine.take_over(&TaskId::new("s1"), &actor()).await.unwrap();

        let report = h.engine.give_back_batch(&group, &actor()).await.unwrap();
        assert_eq!(report.applied(), 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(status(&h.store, "s1").await, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_correction_batches() {
        let h = harness();
        let scan = batch_of_three(&h).await;
        h.engine.take_over_batch(&scan, &actor()).await.unwrap();
        h.engine.close_batch(&scan, &actor()).await.unwrap();

        // Export is not batch eligible, so build the group by hand
        let export = BatchGroup {
            batch_id: BatchId::new("b"),
            title: "Export".into(),
            members: (1..=3)
                .map(|n| BatchMember {
                    process_id: ProcessId::new(format!("p{n}")),
                    task_id: TaskId::new(format!("e{n}")),
                    status: TaskStatus::Open,
                })
                .collect(),
        };
        let report = h
            .engine
            .report_problem_batch(&export, "Scan", "wrong colour profile", &actor())
            .await
            .unwrap();
        assert!(report.is_complete());
        for n in 1..=3 {
            assert_eq!(status(&h.store, &format!("s{n}")).await, TaskStatus::Open);
            assert_eq!(status(&h.store, &format!("e{n}")).await, TaskStatus::Locked);
        }

        let scan = h.engine.batch_group(&BatchId::new("b"), "Scan").await.unwrap();
        let report = h
            .engine
            .solve_problem_batch(&scan, "Export", "rescanned", &actor())
            .await
            .unwrap();
        assert!(report.is_complete());
        for n in 1..=3 {
            assert_eq!(status(&h.store, &format!("s{n}")).await, TaskStatus::Done);
            assert_eq!(status(&h.store, &format!("e{n}")).await, TaskStatus::Open);
        }
    }

    #[tokio::test]
    async fn test_apply_property_to_all() {
        let h = harness();
        let group = batch_of_three(&h).await;
        let blank_owner = PropertyOwner::Process(ProcessId::new("p3"));
        h.store
            .put_property(&blank_owner, Property::new("  ", "stale", PropertyType::General))
            .await
            .unwrap();

        let property = Property::new("Shelfmark", "Ms. 17", PropertyType::General);
        let report = h
            .engine
            .apply_property_to_all(&group, &ProcessId::new("p1"), &property)
            .await
            .unwrap();
        assert!(report.is_complete());

        let mut ids = Vec::new();
        for n in 1..=3 {
            let props = h
                .store
                .properties(&PropertyOwner::Process(ProcessId::new(format!("p{n}"))))
                .await
                .unwrap();
            assert_eq!(props.len(), 1, "p{n}");
            assert_eq!(props[0].title, "Shelfmark");
            assert_eq!(props[0].value, "Ms. 17");
            ids.push(props[0].id.clone());
        }
        assert_eq!(ids[0], property.id);
        assert_ne!(ids[1], property.id);
        assert_ne!(ids[1], ids[2]);

        let blank = Property::new("", "x", PropertyType::General);
        assert!(matches!(
            h.engine
                .apply_property_to_all(&group, &ProcessId::new("p1"), &blank)
                .await,
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_run_script_batch() {
        let h = harness_with(
            ScriptedRunner::default().exiting("derive", 1),
            FailingChecks::default(),
        );
        let group = batch_of_three(&h).await;

        let report = h.engine.run_script_batch(&group, "derive").await.unwrap();
        assert_eq!(report.failed(), 3);
        assert!(matches!(
            report.outcomes[0].result,
            MemberResult::Failed(EngineError::ScriptFailure {
                source: ScriptError::NonZeroExit(1),
                ..
            })
        ));
        assert_eq!(status(&h.store, "s1").await, TaskStatus::Open);

        let report = h.engine.run_script_batch(&group, "other").await.unwrap();
        assert_eq!(report.skipped(), 3);
        assert_eq!(h.runner.runs().len(), 3);
    }
}
