/*!
 Errors that can happen when reading or writing binary property lists and keyed archives.
*/

pub mod archive;
pub mod bplist;
