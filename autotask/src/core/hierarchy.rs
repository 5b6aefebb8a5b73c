//! Parent-chain walks over a user's task list.
//!
//! Tasks reference their parent by id. A group is a main task plus every task
//! whose chain of parents ends at it.

use std::collections::HashSet;

use crate::core::error::HierarchyError;
use crate::task::AutoTask;

fn find<'a>(tasks: &'a [AutoTask], id: &str) -> Option<&'a AutoTask> {
    tasks.iter().find(|task| task.id == id)
}

/// Walk from `task_id` up to its main task.
///
/// Returns the chain starting at `task_id` and ending at the main task, so a
/// chain of N sub-tasks yields N+1 entries. The walk visits each task at most
/// once: a revisit is reported as [`HierarchyError::ParentCycle`].
pub fn walk_to_root<'a>(
    tasks: &'a [AutoTask],
    task_id: &str,
) -> Result<Vec<&'a AutoTask>, HierarchyError> {
    let mut current =
        find(tasks, task_id).ok_or_else(|| HierarchyError::TaskNotFound(task_id.to_string()))?;
    let mut visited = HashSet::new();
    let mut chain = Vec::new();

    loop {
        if !visited.insert(current.id.as_str()) {
            return Err(HierarchyError::ParentCycle(task_id.to_string()));
        }
        chain.push(current);
        let Some(parent_id) = current.parent_id.as_deref() else {
            return Ok(chain);
        };
        current = find(tasks, parent_id).ok_or_else(|| HierarchyError::BrokenParent {
            task: current.id.clone(),
            parent: parent_id.to_string(),
        })?;
    }
}

/// The main task at the top of `task_id`'s chain.
pub fn root_of<'a>(tasks: &'a [AutoTask], task_id: &str) -> Result<&'a AutoTask, HierarchyError> {
    let chain = walk_to_root(tasks, task_id)?;
    chain
        .last()
        .copied()
        .ok_or_else(|| HierarchyError::TaskNotFound(task_id.to_string()))
}

/// True when `task` sits somewhere below the main task `root_id`.
///
/// Tasks with a broken or looping chain belong to no group.
pub fn belongs_to(tasks: &[AutoTask], task: &AutoTask, root_id: &str) -> bool {
    !task.is_main()
        && root_of(tasks, &task.id)
            .map(|root| root.id == root_id)
            .unwrap_or(false)
}

/// Every task in the group rooted at `root_id`, the root included.
///
/// Ordered by depth below the root, then by store order.
pub fn group_members<'a>(tasks: &'a [AutoTask], root_id: &str) -> Vec<&'a AutoTask> {
    let mut members: Vec<(usize, usize, &AutoTask)> = tasks
        .iter()
        .enumerate()
        .filter_map(|(idx, task)| {
            let chain = walk_to_root(tasks, &task.id).ok()?;
            let root = chain.last()?;
            (root.id == root_id).then_some((chain.len() - 1, idx, task))
        })
        .collect();
    members.sort_by_key(|&(depth, idx, _)| (depth, idx));
    members.into_iter().map(|(_, _, task)| task).collect()
}

/// The group rooted at `root_id` in tree order.
///
/// Every task follows its parent, and siblings keep store order, so any
/// root-to-leaf chain reads main to sub.
pub fn group_in_tree_order<'a>(tasks: &'a [AutoTask], root_id: &str) -> Vec<&'a AutoTask> {
    let members = group_members(tasks, root_id);
    let ids: HashSet<&str> = members.iter().map(|task| task.id.as_str()).collect();
    let mut ordered = Vec::with_capacity(members.len());
    let mut stack: Vec<&AutoTask> = members.first().copied().into_iter().collect();
    while let Some(task) = stack.pop() {
        ordered.push(task);
        let children: Vec<&AutoTask> = tasks
            .iter()
            .filter(|child| {
                child.parent_id.as_deref() == Some(task.id.as_str())
                    && ids.contains(child.id.as_str())
            })
            .collect();
        stack.extend(children.into_iter().rev());
    }
    ordered
}
