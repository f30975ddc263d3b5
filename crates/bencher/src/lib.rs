/// A request to push through a pipeline of `chain_len` pass-through hooks.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    target: &'static str,
    chain_len: usize,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, target: &'static str, chain_len: usize) -> Self {
        Self { name, group, target, chain_len }
    }

    pub fn small(name: &'static str, target: &'static str) -> Self {
        Self::new(name, TestGroup::Small, target, 1)
    }

    pub fn normal(name: &'static str, target: &'static str) -> Self {
        Self::new(name, TestGroup::Normal, target, 8)
    }

    pub fn large(name: &'static str, target: &'static str) -> Self {
        Self::new(name, TestGroup::Large, target, 64)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    /// Path and query of the request, e.g. `/items?tag=a&tag=b`.
    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn chain_len(&self) -> usize {
        self.chain_len
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
