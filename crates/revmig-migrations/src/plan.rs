//! Migration execution plan
//!
//! Planning is the pure half of a run: it turns the observed marker and a
//! requested target into the ordered list of revisions to execute. The
//! runner later re-reads the marker under the lock and refuses to execute a
//! plan whose starting point moved.

use super::graph::{RevisionGraph, replay};
use super::migration::{Revision, RevisionId};
use super::operations::{Operation, SqlDialect};
use super::store::sql::VERSION_TABLE;
use super::store::StoreError;
use super::{MigrationError, Result};
use std::fmt;
use std::str::FromStr;

/// Requested end state of a run
///
/// # Example
///
/// ```rust
/// use revmig_migrations::Target;
///
/// assert_eq!("head".parse::<Target>().unwrap(), Target::Head);
/// assert_eq!("base".parse::<Target>().unwrap(), Target::Base);
/// assert_eq!(
///     "1a2b".parse::<Target>().unwrap(),
///     Target::Revision("1a2b".to_string())
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
	/// The single head of the graph
	Head,
	/// Before the first revision
	Base,
	/// A revision id or unique id prefix
	Revision(String),
}

impl FromStr for Target {
	type Err = MigrationError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim() {
			"" => Err(MigrationError::Validation("empty revision target".to_string())),
			"head" | "heads" => Ok(Target::Head),
			"base" => Ok(Target::Base),
			other => Ok(Target::Revision(other.to_string())),
		}
	}
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Target::Head => f.write_str("head"),
			Target::Base => f.write_str("base"),
			Target::Revision(id) => f.write_str(id),
		}
	}
}

impl From<&RevisionId> for Target {
	fn from(id: &RevisionId) -> Self {
		Target::Revision(id.to_string())
	}
}

/// Direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Up,
	Down,
}

impl Direction {
	pub fn name(&self) -> &'static str {
		match self {
			Direction::Up => "upgrade",
			Direction::Down => "downgrade",
		}
	}
}

/// One revision of a plan
#[derive(Debug, Clone)]
pub struct PlanStep {
	pub revision: Revision,
	/// Marker value once this step commits
	pub marker_after: Option<RevisionId>,
}

impl PlanStep {
	/// Operations this step executes: `up_ops` or `down_ops`
	pub fn operations(&self, direction: Direction) -> &[Operation] {
		match direction {
			Direction::Up => &self.revision.up_ops,
			Direction::Down => &self.revision.down_ops,
		}
	}
}

/// Migration execution plan
#[derive(Debug, Clone)]
pub struct MigrationPlan {
	pub direction: Direction,
	/// Marker observed while planning; execution requires it unchanged
	pub expected_marker: Vec<RevisionId>,
	/// Steps in execution order
	pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
	/// Resolve `target` against `graph`, starting from `marker`
	///
	/// # Errors
	///
	/// - [`MigrationError::MultipleMarkers`] when `marker` has several rows
	/// - [`MigrationError::AmbiguousHead`] for `head` with divergent branches
	/// - [`MigrationError::NotFound`] for unknown ids or prefixes
	/// - [`MigrationError::NoPath`] when the target is not reachable in the
	///   requested direction
	pub fn resolve(
		graph: &RevisionGraph,
		direction: Direction,
		target: &Target,
		marker: &[RevisionId],
	) -> Result<Self> {
		let current = current_revision(marker)?;
		if let Some(current) = current
			&& !graph.contains(current)
		{
			return Err(MigrationError::NotFound(format!(
				"{} (recorded in the database marker)",
				current
			)));
		}

		let target = match target {
			Target::Head => graph.head()?.map(|head| head.id.clone()),
			Target::Base => None,
			Target::Revision(prefix) => Some(graph.resolve(prefix)?.id.clone()),
		};

		let steps = match direction {
			Direction::Up => graph
				.path(current, target.as_ref())?
				.into_iter()
				.map(|revision| PlanStep {
					revision: revision.clone(),
					marker_after: Some(revision.id.clone()),
				})
				.collect(),
			Direction::Down => {
				let mut steps: Vec<_> = graph
					.path(target.as_ref(), current)?
					.into_iter()
					.map(|revision| PlanStep {
						revision: revision.clone(),
						marker_after: revision.parent_id.clone(),
					})
					.collect();
				steps.reverse();
				steps
			}
		};

		Ok(Self {
			direction,
			expected_marker: marker.to_vec(),
			steps,
		})
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	pub fn len(&self) -> usize {
		self.steps.len()
	}

	/// Marker value after the whole plan commits
	pub fn final_marker(&self) -> Option<&RevisionId> {
		match self.steps.last() {
			Some(step) => step.marker_after.as_ref(),
			None => self.expected_marker.first(),
		}
	}

	/// Replay every step against the recorded schema
	///
	/// Catches corrupted or hand-edited revisions before any statement runs.
	///
	/// # Errors
	///
	/// Returns [`MigrationError::InvalidOperation`] tagged with the first
	/// revision that cannot be replayed.
	pub fn preflight(&self, graph: &RevisionGraph) -> Result<()> {
		let mut snapshot = graph.snapshot_at(self.expected_marker.first())?;
		for step in &self.steps {
			snapshot = replay(&snapshot, &step.revision, step.operations(self.direction))?;
		}
		Ok(())
	}

	/// Render the statements the plan would run, marker updates included
	///
	/// # Errors
	///
	/// Returns [`MigrationError::UnsupportedOperation`] for operations the
	/// dialect cannot express.
	pub fn to_sql(&self, dialect: SqlDialect) -> Result<Vec<String>> {
		let table = dialect.quote_ident(VERSION_TABLE);
		let mut statements = Vec::new();
		let mut marker = self.expected_marker.first().cloned();
		for step in &self.steps {
			statements.push(format!(
				"-- Running {} {} -> {}: {}",
				self.direction.name(),
				marker.as_ref().map_or("base", RevisionId::as_str),
				step.marker_after.as_ref().map_or("base", RevisionId::as_str),
				step.revision.message
			));
			for operation in step.operations(self.direction) {
				let rendered = operation.to_sql(dialect).map_err(|err| match err {
					StoreError::Unsupported(_) => MigrationError::UnsupportedOperation {
						revision: step.revision.id.clone(),
						kind: operation.kind(),
						backend: dialect.name().to_string(),
					},
					other => MigrationError::Store(other),
				})?;
				statements.extend(rendered);
			}
			statements.push(format!("DELETE FROM {}", table));
			if let Some(id) = &step.marker_after {
				statements.push(format!(
					"INSERT INTO {} (version_num) VALUES ({})",
					table,
					dialect.quote_literal(id.as_str())
				));
			}
			marker = step.marker_after.clone();
		}
		Ok(statements)
	}
}

/// The single current revision of a marker
pub(crate) fn current_revision(marker: &[RevisionId]) -> Result<Option<&RevisionId>> {
	match marker {
		[] => Ok(None),
		[current] => Ok(Some(current)),
		_ => Err(MigrationError::MultipleMarkers {
			markers: marker.to_vec(),
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fields::ColumnType;
	use crate::snapshot::ColumnDefinition;
	use rstest::{fixture, rstest};

	fn id(value: &str) -> RevisionId {
		RevisionId::new(value).unwrap()
	}

	#[fixture]
	fn graph() -> RevisionGraph {
		let create = Operation::CreateTable {
			name: "items".to_string(),
			columns: vec![ColumnDefinition::id()],
			primary_key: vec![],
			indexes: vec![],
		};
		let add = Operation::AddColumn {
			table: "items".to_string(),
			column: ColumnDefinition::new("qty", ColumnType::Integer),
		};
		RevisionGraph::from_revisions([
			Revision::new(None, "create items")
				.with_id(id("aaa111"))
				.with_operations(
					vec![create],
					vec![Operation::DropTable {
						name: "items".to_string(),
					}],
				),
			Revision::new(Some(id("aaa111")), "add qty")
				.with_id(id("bbb222"))
				.with_operations(
					vec![add],
					vec![Operation::DropColumn {
						table: "items".to_string(),
						column: "qty".to_string(),
					}],
				),
		])
		.unwrap()
	}

	fn ids(plan: &MigrationPlan) -> Vec<&str> {
		plan.steps.iter().map(|s| s.revision.id.as_str()).collect()
	}

	#[rstest]
	fn test_up_to_head_from_empty(graph: RevisionGraph) {
		let plan = MigrationPlan::resolve(&graph, Direction::Up, &Target::Head, &[]).unwrap();
		assert_eq!(ids(&plan), vec!["aaa111", "bbb222"]);
		assert_eq!(plan.final_marker(), Some(&id("bbb222")));
		plan.preflight(&graph).unwrap();
	}

	#[rstest]
	fn test_up_at_head_is_empty(graph: RevisionGraph) {
		let plan =
			MigrationPlan::resolve(&graph, Direction::Up, &Target::Head, &[id("bbb222")]).unwrap();
		assert!(plan.is_empty());
		assert_eq!(plan.final_marker(), Some(&id("bbb222")));
	}

	#[rstest]
	fn test_down_to_base_walks_most_recent_first(graph: RevisionGraph) {
		let plan =
			MigrationPlan::resolve(&graph, Direction::Down, &Target::Base, &[id("bbb222")]).unwrap();
		assert_eq!(ids(&plan), vec!["bbb222", "aaa111"]);
		assert_eq!(plan.steps[0].marker_after, Some(id("aaa111")));
		assert_eq!(plan.final_marker(), None);
		plan.preflight(&graph).unwrap();
	}

	#[rstest]
	fn test_down_by_prefix(graph: RevisionGraph) {
		let target: Target = "aaa".parse().unwrap();
		let plan = MigrationPlan::resolve(&graph, Direction::Down, &target, &[id("bbb222")]).unwrap();
		assert_eq!(ids(&plan), vec!["bbb222"]);
	}

	#[rstest]
	fn test_up_backwards_is_no_path(graph: RevisionGraph) {
		let target = Target::Revision("aaa111".to_string());
		assert!(matches!(
			MigrationPlan::resolve(&graph, Direction::Up, &target, &[id("bbb222")]),
			Err(MigrationError::NoPath { .. })
		));
	}

	#[rstest]
	fn test_multiple_markers_are_rejected(graph: RevisionGraph) {
		assert!(matches!(
			MigrationPlan::resolve(
				&graph,
				Direction::Up,
				&Target::Head,
				&[id("aaa111"), id("bbb222")]
			),
			Err(MigrationError::MultipleMarkers { .. })
		));
	}

	#[rstest]
	fn test_unknown_marker_is_reported(graph: RevisionGraph) {
		assert!(matches!(
			MigrationPlan::resolve(&graph, Direction::Up, &Target::Head, &[id("fff999")]),
			Err(MigrationError::NotFound(_))
		));
	}

	#[rstest]
	fn test_offline_sql(graph: RevisionGraph) {
		let plan = MigrationPlan::resolve(&graph, Direction::Up, &Target::Head, &[]).unwrap();
		let sql = plan.to_sql(SqlDialect::Sqlite).unwrap();
		assert_eq!(
			sql,
			vec![
				"-- Running upgrade base -> aaa111: create items".to_string(),
				"CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT)".to_string(),
				"DELETE FROM revmig_version".to_string(),
				"INSERT INTO revmig_version (version_num) VALUES ('aaa111')".to_string(),
				"-- Running upgrade aaa111 -> bbb222: add qty".to_string(),
				"ALTER TABLE items ADD COLUMN qty INTEGER".to_string(),
				"DELETE FROM revmig_version".to_string(),
				"INSERT INTO revmig_version (version_num) VALUES ('bbb222')".to_string(),
			]
		);
	}
}
