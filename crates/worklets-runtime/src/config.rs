//! Runtime configuration.
//!
//! Limits that keep a runaway worklet from hanging the UI thread, and knobs
//! for the value-conversion engine.

use boa_engine::Context;

/// Execution limits applied to every JavaScript context a runtime creates.
///
/// Boa cannot interrupt a running script on a timer, so limits are expressed
/// as loop iteration and call recursion caps. Exceeding either aborts the
/// current call with an uncatchable error.
///
/// # Example
///
/// ```
/// use worklets_runtime::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .with_loop_iteration_limit(1_000_000)
///     .with_recursion_limit(256);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// Maximum iterations of a single loop, `None` for Boa's default (unbounded)
    pub loop_iteration_limit: Option<u64>,
    /// Maximum call depth, `None` for Boa's default
    pub recursion_limit: Option<usize>,
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = Some(limit);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Validates the limits.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured limit is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.loop_iteration_limit == Some(0) {
            return Err("loop iteration limit must be greater than zero".to_string());
        }
        if self.recursion_limit == Some(0) {
            return Err("recursion limit must be greater than zero".to_string());
        }
        Ok(())
    }

    pub(crate) fn apply(&self, context: &mut Context) {
        let limits = context.runtime_limits_mut();
        if let Some(limit) = self.loop_iteration_limit {
            limits.set_loop_iteration_limit(limit);
        }
        if let Some(limit) = self.recursion_limit {
            limits.set_recursion_limit(limit);
        }
    }
}

/// Configuration for a worklet runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Deepest value graph `adapt` will walk before failing
    pub max_conversion_depth: usize,
    /// Side-table size at which dead weak entries are swept
    pub side_table_prune_threshold: usize,
    /// Longest array `adapt` will copy; sparse arrays count their holes
    pub max_array_length: usize,
    pub limits: ResourceLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_conversion_depth: 64,
            side_table_prune_threshold: 256,
            max_array_length: 1 << 20,
            limits: ResourceLimits::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_conversion_depth(mut self, depth: usize) -> Self {
        self.max_conversion_depth = depth;
        self
    }

    pub fn with_side_table_prune_threshold(mut self, threshold: usize) -> Self {
        self.side_table_prune_threshold = threshold;
        self
    }

    pub fn with_max_array_length(mut self, length: usize) -> Self {
        self.max_array_length = length;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The conversion depth is zero or above 4096
    /// - The prune threshold is zero
    /// - The array length limit is zero
    /// - The resource limits are invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conversion_depth == 0 {
            return Err("max conversion depth must be greater than zero".to_string());
        }
        if self.max_conversion_depth > 4096 {
            return Err(format!(
                "max conversion depth must be <= 4096 (got {})",
                self.max_conversion_depth
            ));
        }
        if self.side_table_prune_threshold == 0 {
            return Err("side table prune threshold must be greater than zero".to_string());
        }
        if self.max_array_length == 0 {
            return Err("max array length must be greater than zero".to_string());
        }
        self.limits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_conversion_depth, 64);
        assert_eq!(config.side_table_prune_threshold, 256);
        assert_eq!(config.max_array_length, 1 << 20);
        assert_eq!(config.limits, ResourceLimits::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let config = RuntimeConfig::new()
            .with_max_conversion_depth(8)
            .with_side_table_prune_threshold(16)
            .with_max_array_length(100)
            .with_limits(ResourceLimits::new().with_loop_iteration_limit(100));

        assert_eq!(config.max_conversion_depth, 8);
        assert_eq!(config.side_table_prune_threshold, 16);
        assert_eq!(config.max_array_length, 100);
        assert_eq!(config.limits.loop_iteration_limit, Some(100));
        assert_eq!(config.limits.recursion_limit, None);
    }

    #[test]
    fn test_validate_zero_depth_fails() {
        let err = RuntimeConfig::new().with_max_conversion_depth(0).validate().unwrap_err();
        assert!(err.contains("greater than zero"));
    }

    #[test]
    fn test_validate_excessive_depth_fails() {
        let err = RuntimeConfig::new().with_max_conversion_depth(10_000).validate().unwrap_err();
        assert!(err.contains("4096"));
    }

    #[test]
    fn test_validate_zero_array_length_fails() {
        let err = RuntimeConfig::new().with_max_array_length(0).validate().unwrap_err();
        assert!(err.contains("array length"));
    }

    #[test]
    fn test_validate_zero_limits_fail() {
        assert!(ResourceLimits::new().with_loop_iteration_limit(0).validate().is_err());
        assert!(ResourceLimits::new().with_recursion_limit(0).validate().is_err());
        let config = RuntimeConfig::new().with_limits(ResourceLimits::new().with_recursion_limit(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loop_limit_aborts_runaway_script() {
        let mut context = Context::default();
        ResourceLimits::new().with_loop_iteration_limit(1_000).apply(&mut context);

        let result = context.eval(Source::from_bytes("while (true) {}"));
        assert!(result.is_err());
    }

    #[test]
    fn test_limits_leave_normal_scripts_alone() {
        let mut context = Context::default();
        ResourceLimits::new().with_loop_iteration_limit(1_000).apply(&mut context);

        let result = context
            .eval(Source::from_bytes("let n = 0; for (let i = 0; i < 10; i++) { n += i; } n"))
            .unwrap();
        assert_eq!(result.as_number(), Some(45.0));
    }
}
