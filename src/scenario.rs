//! Experimental scenario: the immutable description of providers, nodes,
//! services and price tables, parsed from a line-oriented text file.
//!
//! File syntax: one `key = value` per line, `#` starts a comment, blank lines
//! are ignored and keys are case-insensitive. Vector values are bracketed
//! (`[v1 v2 ...]`), per-provider and per-category tables nest one bracket
//! level, and workloads nest two (`[ [ [dur rate] ... ] ... ]`).

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Scenario {
    /// Number of fog providers (FPs).
    pub num_fps: usize,
    /// Number of fog node (FN) categories.
    pub num_fn_categories: usize,
    /// Number of service categories.
    pub num_svc_categories: usize,
    /// Number of VM categories.
    pub num_vm_categories: usize,
    /// Max delay tolerated by services, by service category.
    pub svc_max_delays: Vec<f64>,
    /// Category of the VMs running each service, by service category.
    pub svc_vm_categories: Vec<usize>,
    /// Service rate of a single VM, by service category.
    pub svc_vm_service_rates: Vec<f64>,
    /// Workload steps `(duration, arrival_rate)`, by service category.
    pub svc_workloads: Vec<Vec<(f64, f64)>>,
    /// Number of services, by FP and service category.
    pub fp_num_svcs: Vec<Vec<usize>>,
    /// Number of FNs, by FP and FN category.
    pub fp_num_fns: Vec<Vec<usize>>,
    /// Electricity price (per kWh), by FP.
    pub fp_electricity_costs: Vec<f64>,
    /// Administration fee paid while participating in a non-trivial
    /// coalition, by FP.
    pub fp_coalition_costs: Vec<f64>,
    /// Revenue for running a service, by FP and service category.
    pub fp_svc_revenues: Vec<Vec<f64>>,
    /// Penalty rate for violating a service SLA, by FP and service category.
    pub fp_svc_penalties: Vec<Vec<f64>>,
    /// Cost of powering off a powered-on FN, by FP and FN category.
    pub fp_fn_asleep_costs: Vec<Vec<f64>>,
    /// Cost of powering on a powered-off FN, by FP and FN category.
    pub fp_fn_awake_costs: Vec<Vec<f64>>,
    /// FN power consumption at zero load (kW), by FN category.
    pub fn_min_powers: Vec<f64>,
    /// FN power consumption at full load (kW), by FN category.
    pub fn_max_powers: Vec<f64>,
    /// VM CPU requirement as a host fraction, by VM and FN category.
    pub vm_cpu_requirements: Vec<Vec<f64>>,
    /// VM RAM requirement as a host fraction, by VM and FN category.
    pub vm_ram_requirements: Vec<Vec<f64>>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_str_named(&content, &path_str)
    }

    pub fn from_str_named(content: &str, path: &str) -> Result<Self> {
        let mut scenario = Scenario::default();
        for (lineno, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cursor = Cursor::new(line, path, lineno + 1);
            scenario.parse_line(&mut cursor)?;
        }
        scenario.check()?;
        Ok(scenario)
    }

    /// Total number of FNs across all providers.
    pub fn total_fns(&self) -> usize {
        self.fp_num_fns.iter().flatten().sum()
    }

    /// Total number of services across all providers.
    pub fn total_svcs(&self) -> usize {
        self.fp_num_svcs.iter().flatten().sum()
    }

    fn parse_line(&mut self, cur: &mut Cursor) -> Result<()> {
        let key = cur.read_key()?;
        cur.expect('=')?;
        match key.as_str() {
            "num_fps" => self.num_fps = cur.read_usize()?,
            "num_fn_categories" => self.num_fn_categories = cur.read_usize()?,
            "num_svc_categories" => self.num_svc_categories = cur.read_usize()?,
            "num_vm_categories" => self.num_vm_categories = cur.read_usize()?,
            "svc.max_delays" => {
                self.svc_max_delays = cur.read_real_vector(self.count(Count::SvcCategories)?)?;
            }
            "svc.vm_categories" => {
                self.svc_vm_categories = cur.read_usize_vector(self.count(Count::SvcCategories)?)?;
            }
            "svc.vm_service_rates" => {
                self.svc_vm_service_rates = cur.read_real_vector(self.count(Count::SvcCategories)?)?;
            }
            "svc.workloads" => {
                self.svc_workloads = cur.read_workloads(self.count(Count::SvcCategories)?)?;
            }
            "fp.num_svcs" => {
                self.fp_num_svcs = cur.read_usize_table(
                    self.count(Count::Fps)?,
                    self.count(Count::SvcCategories)?,
                )?;
            }
            "fp.num_fns" => {
                self.fp_num_fns = cur.read_usize_table(
                    self.count(Count::Fps)?,
                    self.count(Count::FnCategories)?,
                )?;
            }
            "fp.electricity_costs" => {
                self.fp_electricity_costs = cur.read_real_vector(self.count(Count::Fps)?)?;
            }
            "fp.coalition_costs" => {
                self.fp_coalition_costs = cur.read_real_vector(self.count(Count::Fps)?)?;
            }
            "fp.svc_revenues" => {
                self.fp_svc_revenues = cur.read_real_table(
                    self.count(Count::Fps)?,
                    self.count(Count::SvcCategories)?,
                )?;
            }
            "fp.svc_penalties" => {
                self.fp_svc_penalties = cur.read_real_table(
                    self.count(Count::Fps)?,
                    self.count(Count::SvcCategories)?,
                )?;
            }
            "fp.fn_asleep_costs" => {
                self.fp_fn_asleep_costs = cur.read_real_table(
                    self.count(Count::Fps)?,
                    self.count(Count::FnCategories)?,
                )?;
            }
            "fp.fn_awake_costs" => {
                self.fp_fn_awake_costs = cur.read_real_table(
                    self.count(Count::Fps)?,
                    self.count(Count::FnCategories)?,
                )?;
            }
            "fn.min_powers" => {
                self.fn_min_powers = cur.read_real_vector(self.count(Count::FnCategories)?)?;
            }
            "fn.max_powers" => {
                self.fn_max_powers = cur.read_real_vector(self.count(Count::FnCategories)?)?;
            }
            "vm.cpu_requirements" => {
                self.vm_cpu_requirements = cur.read_real_table(
                    self.count(Count::VmCategories)?,
                    self.count(Count::FnCategories)?,
                )?;
            }
            "vm.ram_requirements" => {
                self.vm_ram_requirements = cur.read_real_table(
                    self.count(Count::VmCategories)?,
                    self.count(Count::FnCategories)?,
                )?;
            }
            other => {
                return Err(cur.error(&format!("unrecognized key '{}'", other)));
            }
        }
        Ok(())
    }

    fn count(&self, which: Count) -> Result<usize> {
        let (n, key) = match which {
            Count::Fps => (self.num_fps, "num_fps"),
            Count::FnCategories => (self.num_fn_categories, "num_fn_categories"),
            Count::SvcCategories => (self.num_svc_categories, "num_svc_categories"),
            Count::VmCategories => (self.num_vm_categories, "num_vm_categories"),
        };
        if n == 0 {
            return Err(Error::ScenarioCheck(format!(
                "{} must be declared before any table that depends on it",
                key
            )));
        }
        Ok(n)
    }

    fn check(&self) -> Result<()> {
        let need = |cond: bool, msg: &str| -> Result<()> {
            if cond {
                Ok(())
            } else {
                Err(Error::ScenarioCheck(msg.to_string()))
            }
        };

        need(self.num_fps > 0, "unexpected number of FPs")?;
        need(self.num_fn_categories > 0, "unexpected number of FN categories")?;
        need(self.num_svc_categories > 0, "unexpected number of service categories")?;
        need(self.num_vm_categories > 0, "unexpected number of VM categories")?;
        need(
            self.svc_max_delays.len() == self.num_svc_categories,
            "unexpected number of service categories in svc.max_delays",
        )?;
        need(
            self.svc_vm_categories.len() == self.num_svc_categories,
            "unexpected number of service categories in svc.vm_categories",
        )?;
        need(
            self.svc_vm_service_rates.len() == self.num_svc_categories,
            "unexpected number of service categories in svc.vm_service_rates",
        )?;
        need(
            self.svc_workloads.len() == self.num_svc_categories,
            "unexpected number of service categories in svc.workloads",
        )?;
        for (i, workload) in self.svc_workloads.iter().enumerate() {
            need(
                !workload.is_empty(),
                &format!("empty workload for service category {}", i),
            )?;
        }
        for (i, &cat) in self.svc_vm_categories.iter().enumerate() {
            need(
                cat < self.num_vm_categories,
                &format!("VM category out of range for service category {}", i),
            )?;
        }
        need(
            self.fp_num_svcs.len() == self.num_fps
                && self.fp_num_svcs.iter().all(|v| v.len() == self.num_svc_categories),
            "unexpected shape of fp.num_svcs",
        )?;
        need(
            self.fp_num_fns.len() == self.num_fps
                && self.fp_num_fns.iter().all(|v| v.len() == self.num_fn_categories),
            "unexpected shape of fp.num_fns",
        )?;
        need(
            self.fp_electricity_costs.len() == self.num_fps,
            "unexpected number of FPs in fp.electricity_costs",
        )?;
        need(
            self.fp_coalition_costs.len() == self.num_fps,
            "unexpected number of FPs in fp.coalition_costs",
        )?;
        need(
            self.fp_svc_revenues.len() == self.num_fps
                && self.fp_svc_revenues.iter().all(|v| v.len() == self.num_svc_categories),
            "unexpected shape of fp.svc_revenues",
        )?;
        need(
            self.fp_svc_penalties.len() == self.num_fps
                && self.fp_svc_penalties.iter().all(|v| v.len() == self.num_svc_categories),
            "unexpected shape of fp.svc_penalties",
        )?;
        need(
            self.fp_fn_asleep_costs.len() == self.num_fps
                && self.fp_fn_asleep_costs.iter().all(|v| v.len() == self.num_fn_categories),
            "unexpected shape of fp.fn_asleep_costs",
        )?;
        need(
            self.fp_fn_awake_costs.len() == self.num_fps
                && self.fp_fn_awake_costs.iter().all(|v| v.len() == self.num_fn_categories),
            "unexpected shape of fp.fn_awake_costs",
        )?;
        need(
            self.fn_min_powers.len() == self.num_fn_categories,
            "unexpected number of FN categories in fn.min_powers",
        )?;
        need(
            self.fn_max_powers.len() == self.num_fn_categories,
            "unexpected number of FN categories in fn.max_powers",
        )?;
        need(
            self.vm_cpu_requirements.len() == self.num_vm_categories
                && self.vm_cpu_requirements.iter().all(|v| v.len() == self.num_fn_categories),
            "unexpected shape of vm.cpu_requirements",
        )?;
        need(
            self.vm_ram_requirements.len() == self.num_vm_categories
                && self.vm_ram_requirements.iter().all(|v| v.len() == self.num_fn_categories),
            "unexpected shape of vm.ram_requirements",
        )?;
        for table in [&self.vm_cpu_requirements, &self.vm_ram_requirements] {
            for row in table.iter() {
                for &req in row {
                    need(
                        req > 0.0 && req <= 1.0,
                        "VM resource requirements must lie in (0, 1]",
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl Display for Scenario {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "num_fps={}, num_fn_categories={}, num_svc_categories={}, num_vm_categories={}",
            self.num_fps, self.num_fn_categories, self.num_svc_categories, self.num_vm_categories
        )?;
        write!(f, ", svc.max_delays={:?}", self.svc_max_delays)?;
        write!(f, ", svc.vm_categories={:?}", self.svc_vm_categories)?;
        write!(f, ", svc.vm_service_rates={:?}", self.svc_vm_service_rates)?;
        write!(f, ", svc.workloads={:?}", self.svc_workloads)?;
        write!(f, ", fp.num_svcs={:?}", self.fp_num_svcs)?;
        write!(f, ", fp.num_fns={:?}", self.fp_num_fns)?;
        write!(f, ", fp.electricity_costs={:?}", self.fp_electricity_costs)?;
        write!(f, ", fp.coalition_costs={:?}", self.fp_coalition_costs)?;
        write!(f, ", fp.svc_revenues={:?}", self.fp_svc_revenues)?;
        write!(f, ", fp.svc_penalties={:?}", self.fp_svc_penalties)?;
        write!(f, ", fp.fn_asleep_costs={:?}", self.fp_fn_asleep_costs)?;
        write!(f, ", fp.fn_awake_costs={:?}", self.fp_fn_awake_costs)?;
        write!(f, ", fn.min_powers={:?}", self.fn_min_powers)?;
        write!(f, ", fn.max_powers={:?}", self.fn_max_powers)?;
        write!(f, ", vm.cpu_requirements={:?}", self.vm_cpu_requirements)?;
        write!(f, ", vm.ram_requirements={:?}", self.vm_ram_requirements)
    }
}

/// Identity tables derived from a scenario once at experiment setup: every
/// concrete FN and service is given a dense index and mapped back to its
/// owner and category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityTables {
    /// FP owning each FN.
    pub fn_to_fps: Vec<usize>,
    /// Category of each FN.
    pub fn_categories: Vec<usize>,
    /// FP owning each service.
    pub svc_to_fps: Vec<usize>,
    /// Category of each service.
    pub svc_categories: Vec<usize>,
}

impl IdentityTables {
    pub fn build(scenario: &Scenario) -> Self {
        let mut tables = IdentityTables::default();
        for fp in 0..scenario.num_fps {
            for (cat, &count) in scenario.fp_num_fns[fp].iter().enumerate() {
                for _ in 0..count {
                    tables.fn_to_fps.push(fp);
                    tables.fn_categories.push(cat);
                }
            }
        }
        for fp in 0..scenario.num_fps {
            for (cat, &count) in scenario.fp_num_svcs[fp].iter().enumerate() {
                for _ in 0..count {
                    tables.svc_to_fps.push(fp);
                    tables.svc_categories.push(cat);
                }
            }
        }
        tables
    }

    pub fn num_fns(&self) -> usize {
        self.fn_to_fps.len()
    }

    pub fn num_svcs(&self) -> usize {
        self.svc_to_fps.len()
    }
}

enum Count {
    Fps,
    FnCategories,
    SvcCategories,
    VmCategories,
}

/// Character cursor over a single scenario line, tracking the column for
/// error reporting.
struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    path: &'a str,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &str, path: &'a str, lineno: usize) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
            path,
            line: lineno,
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::ScenarioParse {
            path: self.path.to_string(),
            line: self.line,
            column: self.pos + 1,
            message: message.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, ch: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == ch => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("'{}' is missing", ch))),
        }
    }

    fn read_key(&mut self) -> Result<String> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c.is_whitespace() || c == '=' {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("key is missing"));
        }
        Ok(self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .to_lowercase())
    }

    fn read_token(&mut self) -> Result<String> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c.is_whitespace() || c == '[' || c == ']' {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("number is missing"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn read_real(&mut self) -> Result<f64> {
        let token = self.read_token()?;
        token
            .parse::<f64>()
            .map_err(|_| self.error(&format!("'{}' is not a real number", token)))
    }

    fn read_usize(&mut self) -> Result<usize> {
        let token = self.read_token()?;
        token
            .parse::<usize>()
            .map_err(|_| self.error(&format!("'{}' is not a non-negative integer", token)))
    }

    fn read_real_vector(&mut self, len: usize) -> Result<Vec<f64>> {
        self.expect('[')?;
        let values = (0..len).map(|_| self.read_real()).collect::<Result<_>>()?;
        self.expect(']')?;
        Ok(values)
    }

    fn read_usize_vector(&mut self, len: usize) -> Result<Vec<usize>> {
        self.expect('[')?;
        let values = (0..len).map(|_| self.read_usize()).collect::<Result<_>>()?;
        self.expect(']')?;
        Ok(values)
    }

    fn read_real_table(&mut self, rows: usize, cols: usize) -> Result<Vec<Vec<f64>>> {
        self.expect('[')?;
        let table = (0..rows)
            .map(|_| self.read_real_vector(cols))
            .collect::<Result<_>>()?;
        self.expect(']')?;
        Ok(table)
    }

    fn read_usize_table(&mut self, rows: usize, cols: usize) -> Result<Vec<Vec<usize>>> {
        self.expect('[')?;
        let table = (0..rows)
            .map(|_| self.read_usize_vector(cols))
            .collect::<Result<_>>()?;
        self.expect(']')?;
        Ok(table)
    }

    fn read_workloads(&mut self, num_categories: usize) -> Result<Vec<Vec<(f64, f64)>>> {
        self.expect('[')?;
        let mut workloads = Vec::with_capacity(num_categories);
        for _ in 0..num_categories {
            self.expect('[')?;
            let mut steps = Vec::new();
            while self.peek() == Some('[') {
                self.expect('[')?;
                let duration = self.read_real()?;
                let arrival_rate = self.read_real()?;
                self.expect(']')?;
                steps.push((duration, arrival_rate));
            }
            self.expect(']')?;
            workloads.push(steps);
        }
        self.expect(']')?;
        Ok(workloads)
    }
}
