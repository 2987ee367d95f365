use std::ops::Index;

use vigil_core::Category;

/// Number of events seen per category since the agent started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounters([u64; Category::COUNT]);

impl CategoryCounters {
    pub fn increment(&mut self, category: Category) {
        self.0[category.index()] += 1;
    }

    pub fn get(&self, category: Category) -> u64 {
        self.0[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, u64)> + '_ {
        Category::ALL.iter().map(|category| (*category, self.get(*category)))
    }
}

impl Index<Category> for CategoryCounters {
    type Output = u64;

    fn index(&self, category: Category) -> &Self::Output {
        &self.0[category.index()]
    }
}
