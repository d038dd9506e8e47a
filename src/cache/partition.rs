/// Names the static and dynamic partitions belonging to one deployed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  prefix: String,
  version: String,
}

impl Generation {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// e.g. `catalog-static-v1.0.0`
  pub fn static_partition(&self) -> String {
    format!("{}-static-v{}", self.prefix, self.version)
  }

  /// e.g. `catalog-dynamic-v1.0.0`
  pub fn dynamic_partition(&self) -> String {
    format!("{}-dynamic-v{}", self.prefix, self.version)
  }

  pub fn is_current(&self, partition: &str) -> bool {
    partition == self.static_partition() || partition == self.dynamic_partition()
  }

  /// Whether a partition was created by this application, in any version.
  pub fn owns(&self, partition: &str) -> bool {
    partition
      .strip_prefix(&self.prefix)
      .is_some_and(|rest| rest.starts_with('-'))
  }
}
