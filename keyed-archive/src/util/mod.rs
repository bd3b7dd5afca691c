/*!
 This module defines common utilities used by the codec and the archiver.
*/

pub mod dates;
