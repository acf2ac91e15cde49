use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// Generational index into an [`IndexingContainer`].
///
/// A handle stays valid until the element it points to is removed. After that, the
/// slot may be reused but the generation is incremented so that the old handle
/// no longer resolves.
pub struct Handle<T> {
    index: usize,
    generation: usize,
    phantom_data: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize, generation: usize) -> Self {
        Self {
            index,
            generation,
            phantom_data: PhantomData,
        }
    }

    /// Returns the index of the handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the generation of the handle.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

// The impls are written by hand because deriving them would require `T` to implement the traits.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Arena that hands out [`Handle`]s for the inserted elements and reuses free slots.
pub struct IndexingContainer<T> {
    slots: Vec<Option<T>>,
    generations: Vec<usize>,
    free_list: Vec<usize>,
}

impl<T> Default for IndexingContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexingContainer<T> {
    /// Creates a new empty container.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Inserts a new element into the container.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(free_index) = self.free_list.pop() {
            self.slots[free_index] = Some(value);
            Handle::new(free_index, self.generations[free_index])
        } else {
            let index = self.slots.len();
            self.slots.push(Some(value));
            self.generations.push(0);
            Handle::new(index, 0)
        }
    }

    /// Removes the element at the given handle and returns it.
    pub fn remove(&mut self, handle: &Handle<T>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        self.generations[handle.index()] += 1;
        self.free_list.push(handle.index());
        self.slots[handle.index()].take()
    }

    /// Returns `true` when the handle points to a live element.
    pub fn contains(&self, handle: &Handle<T>) -> bool {
        self.generations.get(handle.index()) == Some(&handle.generation())
            && self.slots.get(handle.index()).is_some_and(Option::is_some)
    }

    /// Returns a reference to the element at the given handle.
    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        if self.generations.get(handle.index()) != Some(&handle.generation()) {
            return None;
        }
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Returns a mutable reference to the element at the given handle.
    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        if self.generations.get(handle.index()) != Some(&handle.generation()) {
            return None;
        }
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Iterates over the live elements in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .zip(self.generations.iter())
            .enumerate()
            .filter_map(|(index, (slot, generation))| slot.as_ref().map(|value| (Handle::new(index, *generation), value)))
    }

    /// Iterates mutably over the live elements in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .zip(self.generations.iter())
            .enumerate()
            .filter_map(|(index, (slot, generation))| slot.as_mut().map(|value| (Handle::new(index, *generation), value)))
    }

    /// Returns the handles of all live elements.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Returns the number of elements in the container.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Returns `true` when the container holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots that can be reused without reallocating.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}
